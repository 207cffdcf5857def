// Entrypoint for the CLI application.
// - Keeps `main` small: load config, create a client and hand it to the UI loop.
// - Returns `anyhow::Result`; a failed login surfaces here and exits non-zero.

use anyhow::Context;
use mft_cli::{api::MftClient, config, logging, ui::main_menu};
use tracing::info;

fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    // Config location: $MFT_CONFIG, the user config dir, or ./config.json.
    // $MFT_ENV picks a named environment. See `config::load`.
    let (name, env) = config::load()?;
    info!(environment = %name, host = %env.server.host, mode = %env.mode(), "using environment");

    let client = MftClient::new(env);
    client
        .ensure_session()
        .context("Could not establish a session with the server")?;

    // Start the interactive menu. This call blocks until the user exits.
    main_menu(&client)?;
    Ok(())
}
