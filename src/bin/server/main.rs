use actix_web::{web, App, HttpRequest, HttpServer, Responder};
use chartagent::{error::Error, llama::LlamaCli, settings::Settings};

use clap::Parser;

mod api;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML file containing the program settings
    #[arg(short, long, default_value = "settings.toml")]
    settings: String,
}

async fn not_found(req: HttpRequest) -> Result<impl Responder, actix_web::Error> {
    api::not_found(req).await
}

#[actix_web::main]
async fn main() -> Result<(), Error> {
    let args: Args = Args::parse();
    let s = Settings::load(&args.settings)?;
    s.setup_logging("server")?;

    // Without llama-cli and a model there is nothing to serve.
    let llm = LlamaCli::locate(&s.llama)
        .inspect_err(|e| log::error!("Could not set up llama-cli: {e}"))?;
    log::debug!("llama-cli parameters: {:?}", llm.identifying_params());

    let state = web::Data::new(api::ServerState::new(s.clone(), Box::new(llm)));

    log::info!(
        "{} listening on {}:{}",
        s.name,
        s.server.address,
        s.server.port
    );
    let s_clone1 = s.clone();
    HttpServer::new(move || {
        let s = s_clone1.clone();
        App::new()
            .wrap(api::cors(&s))
            .app_data(state.clone())
            .configure(|cfg| api::config(cfg, &s))
            .default_service(web::to(not_found))
    })
    .bind((s.server.address, s.server.port))?
    .run()
    .await
    .map_err(Error::from)
}
