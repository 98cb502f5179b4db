use clap::Parser;

fn main() {
    let cli = gmcapctl::Cli::parse();
    if let Err(err) = gmcapctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
