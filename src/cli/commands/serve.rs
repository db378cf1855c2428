use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::cli::ConfigArgs;
use crate::native;

pub async fn execute_serve(args: ConfigArgs) -> Result<()> {
    let config = args.resolve()?;

    let shutdown = CancellationToken::new();
    native::cancel_on_signal(shutdown.clone());

    native::run(config, shutdown).await
}
