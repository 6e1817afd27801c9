use crate::cli::OutputFormat;
use anyhow::{Result, bail};

pub fn ensure_output_supported(format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => Ok(()),
        OutputFormat::Text => {
            bail!("text output is not implemented yet for memsheet-cli; use --format json")
        }
    }
}
