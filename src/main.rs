use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

use qrstamp_server::config::Config;
use qrstamp_server::error::Error;

#[actix_web::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_span_events(FmtSpan::NEW)
        .compact()
        .init();

    let config = Config::load()?;

    qrstamp_server::run(config).await
}
