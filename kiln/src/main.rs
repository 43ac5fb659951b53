use clap::Parser;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(error) = kiln::cli::Cli::parse().run() {
        eprintln!("{}", kiln::cli::error_line(&error));
        std::process::exit(1);
    }
}
