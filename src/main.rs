fn main() -> Result<(), Box<dyn std::error::Error>> {
    toolwire::cli::main()
}
