use {
    anyhow::{Result, anyhow},
    clap::Parser,
    tracing::metadata::LevelFilter,
    tracing_subscriber::{EnvFilter, prelude::*},
    veiled::{
        cli::{Cli, Command},
        config::Config,
        files,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .init();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => {
            let config_file = match cli.config {
                Some(path) => path,
                None => {
                    let config_dir =
                        dirs::config_dir().ok_or_else(|| anyhow!("cannot find config dir"))?;
                    config_dir.join("veiled.json5")
                }
            };
            let config: Config = json5::from_str(&fs_err::read_to_string(config_file)?)?;
            veiled::serve(config).await?;
        }
        Command::Encrypt {
            input,
            output,
            credentials,
        } => files::encrypt_file(&input, &output, &credentials)?,
        Command::Decrypt {
            input,
            output,
            credentials,
        } => files::decrypt_file(&input, &output, &credentials)?,
        Command::GenCredentials { password } => {
            let config = veiled_protocol::GalleryConfig::generate(password)?;
            println!("{}", json5::to_string(&config)?);
        }
    }

    Ok(())
}
