fn main() -> std::process::ExitCode {
    operator_cli::run()
}
