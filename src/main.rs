fn main() -> std::io::Result<()> {
    northwind_ai_lib::run()
}
