use echomeet_lib::config::Config;
use tracing::error;

#[tokio::main]
async fn main() {
    echomeet_lib::logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = echomeet_lib::run(config).await {
        error!("{e}");
        eprintln!("{e}");
        std::process::exit(1);
    }
}
