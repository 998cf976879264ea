use {
    clap::{Args, Parser, Subcommand},
    std::path::PathBuf,
    veiled_protocol::DEFAULT_KDF_ITERS,
};

#[derive(Debug, Parser)]
pub struct Cli {
    #[clap(long)]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve a decrypted view of the gallery on a local address.
    Serve,
    /// Encrypt a single file into the gallery envelope format.
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        credentials: CredentialArgs,
    },
    /// Decrypt a single envelope file.
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        credentials: CredentialArgs,
    },
    /// Generate fresh credentials for a new gallery and print them.
    GenCredentials {
        /// Password to embed in the credentials; omit to let viewers be
        /// prompted at view time.
        #[arg(short, long)]
        password: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct CredentialArgs {
    /// Password in plaintext.
    #[arg(short, long)]
    pub password: Option<String>,
    /// Base64-encoded 128-bit key; takes precedence over the password.
    #[arg(short, long)]
    pub key: Option<String>,
    #[arg(long, default_value = "saltysaltsweetysweet")]
    pub kdf_salt: String,
    #[arg(long, default_value_t = DEFAULT_KDF_ITERS)]
    pub kdf_iters: u32,
    #[arg(long, default_value = "AuTheNTiCatIoNtAG")]
    pub gcm_tag: String,
}
