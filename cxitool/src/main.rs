use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use cxifmt::crypto::Signer;
use cxifmt::ncch::{build_to_file, CliOverrides};

/// Builds a signed CTR Executable Image (CXI) from an ARM32 ELF and a
/// process-capability spec.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Input ARM32 ET_EXEC ELF binary.
    input_elf: PathBuf,
    /// YAML process-capability spec.
    spec_yaml: PathBuf,
    /// Output .cxi path.
    output_cxi: PathBuf,

    /// Icon file, embedded verbatim into ExeFS as "icon".
    #[arg(long)]
    icon: Option<PathBuf>,
    /// Banner file, embedded verbatim into ExeFS as "banner".
    #[arg(long)]
    banner: Option<PathBuf>,
    /// Directory to pack into RomFS.
    #[arg(long)]
    romfs: Option<PathBuf>,

    /// Overrides the low 32 bits of the title id's unique-id field.
    #[arg(long, value_parser = parse_hex_u32)]
    uniqueid: Option<u32>,
    /// Overrides the 16-character product code.
    #[arg(long)]
    productcode: Option<String>,
    /// Overrides the 8-character application title.
    #[arg(long)]
    title: Option<String>,

    /// PKCS#8 PEM-encoded RSA-2048 private key used to sign the NCCH header
    /// and Access Descriptor. Without one, signatures are 0xFF-filled.
    #[arg(long)]
    rsa_key: Option<PathBuf>,

    /// Increase log verbosity; repeatable.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u32::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new().filter_level(level).init();

    if let Err(err) = run(args) {
        eprintln!("[ERROR] {err}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let signer = match &args.rsa_key {
        Some(path) => {
            let pem = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read RSA key {}", path.display()))?;
            Signer::from_pkcs8_pem(&pem)?
        }
        None => Signer::none(),
    };

    let overrides = CliOverrides {
        unique_id: args.uniqueid,
        product_code: args.productcode,
        title: args.title,
    };

    build_to_file(
        &args.input_elf,
        &args.spec_yaml,
        &args.output_cxi,
        args.icon.as_deref(),
        args.banner.as_deref(),
        args.romfs.as_deref(),
        overrides,
        signer,
    )?;

    Ok(())
}
