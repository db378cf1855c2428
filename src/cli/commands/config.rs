use anyhow::Result;

use crate::cli::ConfigArgs;

pub fn execute_config(args: ConfigArgs) -> Result<()> {
    let config = args.resolve()?;
    print!("{}", config.redacted().to_toml()?);
    Ok(())
}
