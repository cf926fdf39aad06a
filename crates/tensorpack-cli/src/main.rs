//! Tensorpack command-line tool
//!
//! Inspect, validate and shard safetensors files.
//!
//! ## Usage
//!
//! ```bash
//! # Summarize a container or a shard index
//! tensorpack inspect model.safetensors
//! tensorpack inspect model.index.json
//!
//! # Check that a file (or every shard of an index) is well formed
//! tensorpack validate model.index.json
//!
//! # Split a container into shards of at most 2 GB
//! tensorpack shard model.safetensors out/model.safetensors --max-shard-size 2GB
//! ```

use std::error::Error;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use tensorpack::{
    read_index, read_with_config, write_sharded_with_config, CodecConfig, Container, ShardIndex,
};

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(name = "tensorpack")]
#[command(version)]
#[command(about = "Inspect, validate and shard safetensors files", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Configuration file path (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header of a container or index
    Inspect {
        /// `.safetensors` file or `.index.json` file
        file: PathBuf,
    },

    /// Decode and validate a container, or every shard of an index
    Validate {
        /// `.safetensors` file or `.index.json` file
        file: PathBuf,
    },

    /// Rewrite a container as shards plus an index
    Shard {
        /// Container to split
        input: PathBuf,

        /// Base path of the output, e.g. `out/model.safetensors`
        output: PathBuf,

        /// Maximum shard size: bytes, or a KB/MB/GB/KiB/MiB/GiB suffix
        #[arg(long, value_parser = parse_size)]
        max_shard_size: Option<u64>,
    },
}

/// Parses `1024`, `500MB`, `2GiB` and the like into bytes.
fn parse_size(input: &str) -> Result<u64, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size '{input}'"))?;
    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        other => return Err(format!("unknown size unit '{other}'")),
    };

    let bytes = value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{input}' is too large"))?;
    if bytes == 0 {
        return Err("size must be positive".to_string());
    }
    Ok(bytes)
}

fn is_index(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(".index.json"))
}

fn inspect_container(container: &Container<'_>, out: &mut dyn Write) -> CliResult<()> {
    writeln!(out, "Tensors:   {}", container.len())?;
    writeln!(out, "Header:    {} bytes", container.header_len())?;
    writeln!(out, "Data:      {} bytes", container.data_len())?;

    if let Some(metadata) = container.metadata() {
        writeln!(out, "Metadata:")?;
        for (key, value) in metadata {
            writeln!(out, "  {key}: {value}")?;
        }
    }

    writeln!(out)?;
    for (name, descriptor) in container.header().tensors() {
        writeln!(
            out,
            "  {name}  {}  {:?}  {} bytes",
            descriptor.dtype,
            descriptor.shape,
            descriptor.byte_len()
        )?;
    }
    Ok(())
}

fn inspect_index(index: &ShardIndex, out: &mut dyn Write) -> CliResult<()> {
    writeln!(out, "Tensors:   {}", index.weight_map.len())?;
    writeln!(out, "Shards:    {}", index.shard_files().len())?;
    if let Some(metadata) = index.metadata {
        writeln!(out, "Total:     {} bytes", metadata.total_size)?;
    }

    writeln!(out)?;
    for (name, file) in &index.weight_map {
        writeln!(out, "  {name}  ->  {file}")?;
    }
    Ok(())
}

fn inspect(path: &Path, config: &CodecConfig, out: &mut dyn Write) -> CliResult<()> {
    if is_index(path) {
        inspect_index(&read_index(path)?, out)
    } else {
        inspect_container(&read_with_config(path, config)?, out)
    }
}

fn validate_index(index: &ShardIndex, config: &CodecConfig, out: &mut dyn Write) -> CliResult<()> {
    for file in index.shard_files() {
        let container = read_with_config(index.base_dir.join(file), config)?;
        let mapped = index
            .weight_map
            .iter()
            .filter(|(_, shard_file)| shard_file.as_str() == file);
        for (name, _) in mapped {
            container.descriptor(name)?;
        }
        debug!("Validated shard {} ({} tensors)", file, container.len());
    }
    writeln!(
        out,
        "OK: {} tensors in {} shards",
        index.weight_map.len(),
        index.shard_files().len()
    )?;
    Ok(())
}

fn validate(path: &Path, config: &CodecConfig, out: &mut dyn Write) -> CliResult<()> {
    if is_index(path) {
        return validate_index(&read_index(path)?, config, out);
    }
    let container = read_with_config(path, config)?;
    writeln!(
        out,
        "OK: {} tensors, {} data bytes",
        container.len(),
        container.data_len()
    )?;
    Ok(())
}

fn shard(
    input: &Path,
    output: &Path,
    max_shard_size: Option<u64>,
    config: &CodecConfig,
    out: &mut dyn Write,
) -> CliResult<()> {
    let container = read_with_config(input, config)?;
    let views = container.tensors().collect::<tensorpack::Result<Vec<_>>>()?;
    info!("Sharding {} ({} tensors)", input.display(), views.len());

    let written = write_sharded_with_config(
        views.iter().map(|(name, view)| (*name, view)),
        container.metadata(),
        output,
        max_shard_size,
        config,
    )?;

    for path in &written.shard_paths {
        writeln!(out, "{}", path.display())?;
    }
    writeln!(out, "{}", written.index_path.display())?;
    Ok(())
}

fn run(args: Args) -> CliResult<()> {
    let config = match &args.config {
        Some(path) => CodecConfig::from_file(path)?,
        None => CodecConfig::default(),
    };
    debug!("Using configuration: {:?}", config);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match &args.command {
        Command::Inspect { file } => inspect(file, &config, &mut out),
        Command::Validate { file } => validate(file, &config, &mut out),
        Command::Shard {
            input,
            output,
            max_shard_size,
        } => shard(input, output, *max_shard_size, &config, &mut out),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set tracing subscriber: {e}");
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let category = e
                .downcast_ref::<tensorpack::Error>()
                .map_or("cli", tensorpack::Error::category);
            eprintln!("error [{category}]: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensorpack::{write, Metadata, TensorBuffer};

    fn sample(dir: &Path) -> PathBuf {
        let path = dir.join("model.safetensors");
        let a = TensorBuffer::from_values(vec![4], &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let b = TensorBuffer::from_values(vec![2, 2], &[1i32, 2, 3, 4]).unwrap();
        let c = TensorBuffer::from_values(vec![8], &[7u8; 8]).unwrap();
        let metadata = Metadata::from([("format".to_string(), "pt".to_string())]);
        write([("a", &a), ("b", &b), ("c", &c)], Some(&metadata), &path).unwrap();
        path
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("5GB").unwrap(), 5_000_000_000);
        assert_eq!(parse_size("500mb").unwrap(), 500_000_000);
        assert_eq!(parse_size("2KiB").unwrap(), 2048);
        assert_eq!(parse_size("1 MiB").unwrap(), 1 << 20);
        assert_eq!(parse_size("3GiB").unwrap(), 3 << 30);
        assert_eq!(parse_size("10B").unwrap(), 10);
    }

    #[test]
    fn test_parse_size_errors() {
        assert!(parse_size("").is_err());
        assert!(parse_size("GB").is_err());
        assert!(parse_size("12XB").is_err());
        assert!(parse_size("0").is_err());
        assert!(parse_size("99999999999999999999GB").is_err());
        assert!(parse_size("18446744073709551615GB").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "tensorpack",
            "shard",
            "in.safetensors",
            "out.safetensors",
            "--max-shard-size",
            "1MB",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.log_level, "debug");
        assert!(matches!(
            args.command,
            Command::Shard {
                max_shard_size: Some(1_000_000),
                ..
            }
        ));

        assert!(Args::try_parse_from(["tensorpack", "shard", "in", "out", "--max-shard-size", "1XB"]).is_err());
    }

    #[test]
    fn test_inspect_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample(dir.path());
        let mut out = Vec::new();

        inspect(&path, &CodecConfig::default(), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Tensors:   3"));
        assert!(text.contains("Data:      40 bytes"));
        assert!(text.contains("format: pt"));
        assert!(text.contains("a  F32  [4]  16 bytes"));
        assert!(text.contains("b  I32  [2, 2]  16 bytes"));
    }

    #[test]
    fn test_shard_then_validate_index() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample(dir.path());
        let output = dir.path().join("out").join("model.safetensors");
        std::fs::create_dir(dir.path().join("out")).unwrap();
        let config = CodecConfig::default();

        let mut out = Vec::new();
        shard(&input, &output, Some(24), &config, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("model-00001-of-00002.safetensors"));
        assert!(text.contains("model.index.json"));

        let index = dir.path().join("out").join("model.index.json");
        let mut out = Vec::new();
        validate(&index, &config, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "OK: 3 tensors in 2 shards\n");

        let mut out = Vec::new();
        inspect(&index, &config, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Total:     40 bytes"));
        assert!(text.contains("a  ->  model-00001-of-00002.safetensors"));
    }

    #[test]
    fn test_unknown_dtype_inspects_but_does_not_shard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bf16.safetensors");
        let header = br#"{"w":{"dtype":"BF16","shape":[2],"data_offsets":[0,4]}}"#;
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(&[0; 4]);
        std::fs::write(&path, bytes).unwrap();
        let config = CodecConfig::default();

        let mut out = Vec::new();
        inspect(&path, &config, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("w  BF16  [2]  4 bytes"));

        let mut out = Vec::new();
        validate(&path, &config, &mut out).unwrap();

        let output = dir.path().join("out.safetensors");
        let mut out = Vec::new();
        let err = shard(&path, &output, None, &config, &mut out).unwrap_err();
        assert!(err.to_string().contains("BF16"));
        assert!(!dir.path().join("out.index.json").exists());
    }

    #[test]
    fn test_validate_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample(dir.path());
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 1);
        std::fs::write(&path, bytes).unwrap();

        let mut out = Vec::new();
        let err = validate(&path, &CodecConfig::default(), &mut out).unwrap_err();
        assert!(err.to_string().contains("incomplete buffer"));
    }

    #[test]
    fn test_validate_index_detects_missing_tensor() {
        let dir = tempfile::tempdir().unwrap();
        sample(dir.path());
        let index = dir.path().join("model.index.json");
        std::fs::write(
            &index,
            br#"{"weight_map": {"a": "model.safetensors", "zzz": "model.safetensors"}}"#,
        )
        .unwrap();

        let mut out = Vec::new();
        let err = validate(&index, &CodecConfig::default(), &mut out).unwrap_err();
        assert!(err.to_string().contains("zzz"));
    }
}
