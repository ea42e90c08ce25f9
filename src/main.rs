use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::process;
use std::time::Duration;

mod cipher;
mod config;
mod error;
mod handshake;
mod logger;
mod protocol;
mod signal;
mod transport;

use cipher::{decrypt_file, AwsCliKms, KeySource, KmsKey, NoKey, StaticKey, KEY_LEN};
use config::{Config, KeyConfig};
use handshake::HandshakeReader;
use protocol::{build_upload_frame, generate_hash};
use signal::GpioSignal;
use transport::SerialOpener;

#[derive(Parser)]
#[command(name = "du_provisioner")]
#[command(about = "DU Provisioner\n\nReads the DU handshake over serial and builds firmware verification frames.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Enable detailed debug (hex dumps of every chunk read)
    #[arg(long, global = true)]
    ddebug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run one handshake with the DU on the configured serial port
    Handshake {
        /// Path to configuration file (JSON)
        config: String,
    },

    /// Build the 64-byte verification frame for a SHA-256 digest
    UploadFrame {
        /// Digest as 64 hex characters
        digest: String,
    },

    /// Hash a hex-encoded firmware image and build its verification frame
    HashImage {
        /// Path to the image file (hex text)
        image: String,

        /// Decrypt the image with this AES-256 key (64 hex characters) before hashing
        #[arg(long)]
        key_hex: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logger::init(cli.debug, cli.ddebug);

    match cli.command {
        Command::Handshake { config } => run_handshake(&config),
        Command::UploadFrame { digest } => print_upload_frame(&digest),
        Command::HashImage { image, key_hex } => hash_image(&image, key_hex.as_deref()),
    }
}

fn run_handshake(config_path: &str) -> Result<()> {
    let config_data = fs::read_to_string(config_path)
        .context(format!("Failed to read configuration {}", config_path))?;
    let config: Config = serde_json::from_str(&config_data)
        .context(format!("Invalid configuration in {}", config_path))?;

    let key_source = build_key_source(config.key.as_ref())?;
    let gpio = GpioSignal::new(&config.gpio);

    // A blocked read cannot be cancelled, so release the presence line before exiting
    let gpio_for_handler = gpio.clone();
    let result = ctrlc::set_handler(move || {
        log::info!("Interrupted, releasing presence line");
        gpio_for_handler.set_level(false);
        process::exit(130);
    });

    if let Err(e) = result {
        log::warn!("Could not set Ctrl-C handler: {}", e);
    }

    let reader = HandshakeReader::new(
        Box::new(SerialOpener::new(config.serial.clone())),
        Box::new(gpio),
        key_source,
    )
    .with_deadline(Duration::from_secs(config.handshake.deadline_secs));

    let identity = reader
        .spawn()
        .wait(|status| println!("STATUS: {}", status))?;

    println!("{}", serde_json::to_string_pretty(&identity)?);

    Ok(())
}

fn build_key_source(key: Option<&KeyConfig>) -> Result<Box<dyn KeySource>> {
    let source: Box<dyn KeySource> = match key {
        None => Box::new(NoKey),
        Some(KeyConfig::Static { hex: key_hex }) => Box::new(StaticKey::new(parse_key(key_hex)?)),
        Some(KeyConfig::Kms { wrapped_key_file, region }) => {
            let wrapped_key = fs::read(wrapped_key_file)
                .context(format!("Failed to read wrapped key {}", wrapped_key_file))?;
            Box::new(KmsKey::new(AwsCliKms, wrapped_key, region.clone()))
        }
    };

    Ok(source)
}

fn parse_key(key_hex: &str) -> Result<Vec<u8>> {
    let key = hex::decode(key_hex.trim()).context("Key is not valid hex")?;
    if key.len() != KEY_LEN {
        anyhow::bail!("Key must be {} bytes, got {}", KEY_LEN, key.len());
    }
    Ok(key)
}

fn print_upload_frame(digest: &str) -> Result<()> {
    let frame = build_upload_frame(digest.trim()).context("Cannot build verification frame")?;
    println!("{}", hex::encode(frame));
    Ok(())
}

fn hash_image(image_path: &str, key_hex: Option<&str>) -> Result<()> {
    let image_hex = fs::read_to_string(image_path)
        .context(format!("Failed to read image {}", image_path))?;

    let digest = match key_hex {
        Some(key_hex) => {
            let key = parse_key(key_hex)?;
            let image = decrypt_file(&image_hex, &key).context("Failed to decrypt image")?;
            log::debug!("Decrypted image: {} bytes", image.len());
            generate_hash(&hex::encode(image))?
        }
        None => generate_hash(&image_hex).context("Image is not valid hex")?,
    };

    let frame = build_upload_frame(&digest)?;
    log::trace!("Verification frame: {}", hex::encode(frame));

    println!("digest: {}", digest);
    println!("frame:  {}", hex::encode(frame));

    Ok(())
}
