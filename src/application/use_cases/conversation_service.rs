use crate::domain::chat::ChatTurn;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

struct Conversation {
    history: Vec<ChatTurn>,
    last_seen: DateTime<Utc>,
}

/// In-process chat histories keyed by session id.
///
/// Entries idle for longer than the TTL are treated as absent and dropped on
/// the next sweep.
pub struct ConversationService {
    conversations: Mutex<HashMap<Uuid, Conversation>>,
    history_limit: usize,
    ttl: Duration,
}

impl ConversationService {
    pub fn new(history_limit: usize, ttl_minutes: u64) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            history_limit,
            ttl: Duration::minutes(ttl_minutes as i64),
        }
    }

    fn is_expired(&self, conversation: &Conversation, now: DateTime<Utc>) -> bool {
        now - conversation.last_seen > self.ttl
    }

    /// Appends one question/answer exchange and keeps the newest
    /// `history_limit` turns. Returns the resulting history length.
    pub fn record_exchange(&self, session: Uuid, question: &str, answer: &str) -> usize {
        let now = Utc::now();
        let mut conversations = self.lock();

        let conversation = conversations.entry(session).or_insert_with(|| Conversation {
            history: vec![],
            last_seen: now,
        });
        if self.is_expired(conversation, now) {
            conversation.history.clear();
        }

        conversation.history.push(ChatTurn::user(question));
        conversation.history.push(ChatTurn::assistant(answer));
        if conversation.history.len() > self.history_limit {
            let excess = conversation.history.len() - self.history_limit;
            conversation.history.drain(..excess);
        }
        conversation.last_seen = now;
        conversation.history.len()
    }

    pub fn history(&self, session: Uuid) -> Vec<ChatTurn> {
        let now = Utc::now();
        self.lock()
            .get(&session)
            .filter(|c| !self.is_expired(c, now))
            .map(|c| c.history.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self, session: Uuid) -> bool {
        self.lock().remove(&session).is_some()
    }

    /// Drops idle conversations. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut conversations = self.lock();
        let before = conversations.len();
        conversations.retain(|_, c| !self.is_expired(c, now));
        let removed = before - conversations.len();
        if removed > 0 {
            debug!(removed, "Purged idle conversations");
        }
        removed
    }

    pub fn active_sessions(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Conversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    fn backdate(&self, session: Uuid, minutes: i64) {
        if let Some(c) = self.lock().get_mut(&session) {
            c.last_seen = c.last_seen - Duration::minutes(minutes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chat::ChatRole;

    #[test]
    fn test_exchange_appends_user_then_assistant() {
        let service = ConversationService::new(20, 60);
        let session = Uuid::new_v4();
        assert_eq!(service.record_exchange(session, "How many customers?", "29."), 2);

        let history = service.history(session);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[0].content, "How many customers?");
        assert_eq!(history[1].role, ChatRole::Assistant);
    }

    #[test]
    fn test_history_truncated_to_latest() {
        let service = ConversationService::new(20, 60);
        let session = Uuid::new_v4();
        for i in 0..11 {
            service.record_exchange(session, &format!("q{}", i), &format!("a{}", i));
        }
        let history = service.history(session);
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].content, "q1");
        assert_eq!(history[19].content, "a10");
    }

    #[test]
    fn test_sessions_are_isolated() {
        let service = ConversationService::new(20, 60);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        service.record_exchange(a, "q", "a");
        assert!(service.history(b).is_empty());
        assert!(service.clear(a));
        assert!(!service.clear(a));
        assert!(service.history(a).is_empty());
    }

    #[test]
    fn test_idle_sessions_expire() {
        let service = ConversationService::new(20, 60);
        let session = Uuid::new_v4();
        service.record_exchange(session, "q", "a");
        service.backdate(session, 61);

        assert!(service.history(session).is_empty());
        assert_eq!(service.record_exchange(session, "q2", "a2"), 2);

        service.backdate(session, 61);
        assert_eq!(service.purge_expired(), 1);
        assert_eq!(service.active_sessions(), 0);
    }
}
