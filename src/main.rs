use std::path::Path;
use std::process::ExitCode;

use alumniscope::config::RunConfig;
use alumniscope::pipeline::vision::OpenAiVisionClient;
use alumniscope::pipeline::{PipelineController, ProfileStore};
use alumniscope::session::{Credentials, DirSessionProvider, SessionProvider};

fn main() -> ExitCode {
    alumniscope::init_tracing();
    tracing::info!(
        version = alumniscope::config::APP_VERSION,
        "Alumniscope starting"
    );

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Run aborted");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Optional first argument: path to a JSON config document. Without one,
    // every setting falls back to its default.
    let config = match std::env::args().nth(1) {
        Some(path) => RunConfig::load(Path::new(&path))?,
        None => {
            let config = RunConfig::default();
            config.validate()?;
            config
        }
    };

    let api_key = config.api_key()?;
    let credentials = Credentials {
        email: std::env::var("LINKEDIN_EMAIL").unwrap_or_default(),
        password: std::env::var("LINKEDIN_PASSWORD").unwrap_or_default(),
    };

    let provider = DirSessionProvider::new(&config.screenshots_dir);
    let mut session = provider.login(&credentials)?;

    let vision = OpenAiVisionClient::new(
        config.endpoint.clone(),
        api_key,
        config.request_timeout(),
        config.max_tokens,
        config.temperature,
    );
    let store = ProfileStore::open(&config.checkpoint_path)?;

    let controller = PipelineController::new(&config, &vision, store);
    let summary = controller.run(session.as_mut())?;

    // Page skips and aborted institutions are reported, not fatal; the run
    // exits zero whenever the dataset was written.
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
