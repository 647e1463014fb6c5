use clap::Parser;

use aquatone::cli::Options;

#[tokio::main]
async fn main() {
    let options = Options::parse();
    if let Err(err) = aquatone::runner::run(options).await {
        eprintln!("aquatone: {:#}", err);
        std::process::exit(1);
    }
}
