use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use promwire_core::{
    CallContext, CodecRegistry, QueryResponse, ResultPayload, TimestampStyle, WireFormat,
};
use promwire_http::AssemblerConfig;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "promwire")]
#[command(about = "Transcode and inspect Prometheus query responses")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a response body from one wire format to another
    Transcode {
        /// File holding the response body
        #[arg(short, long)]
        input: PathBuf,

        /// Format of the input (json or protobuf)
        #[arg(long, default_value = "json")]
        from: WireFormat,

        /// Format to write (json or protobuf)
        #[arg(long, default_value = "protobuf")]
        to: WireFormat,

        /// Output file, stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON timestamp style (prometheus or fixed_millis)
        #[arg(long, value_parser = parse_timestamp_style)]
        timestamp_style: Option<TimestampStyle>,
    },

    /// Print a summary of a response body
    Inspect {
        /// File holding the response body
        #[arg(short, long)]
        input: PathBuf,

        /// Format of the input (json or protobuf)
        #[arg(long, default_value = "json")]
        format: WireFormat,

        /// Also print the label set of every series
        #[arg(long)]
        labels: bool,
    },
}

fn parse_timestamp_style(s: &str) -> Result<TimestampStyle, String> {
    TimestampStyle::parse(s).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = AssemblerConfig::load()?;

    match cli.command {
        Commands::Transcode {
            input,
            from,
            to,
            output,
            timestamp_style,
        } => {
            if let Some(style) = timestamp_style {
                config.codec.timestamp_style = style;
            }
            config.validate()?;
            let registry = CodecRegistry::new(&config.codec)?;
            let response = read_response(&registry, &input, from)?;

            let started = Instant::now();
            let encoded = registry.encode(Some(to.media_type()), &response, &CallContext::background())?;
            debug!("Encoded {} bytes in {:?}", encoded.body.len(), started.elapsed());

            match output {
                Some(path) => {
                    std::fs::write(&path, &encoded.body)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!(
                        "Wrote {} response ({} bytes) to {}",
                        encoded.format,
                        encoded.body.len(),
                        path.display()
                    );
                }
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(&encoded.body)?;
                    stdout.flush()?;
                }
            }
        }
        Commands::Inspect {
            input,
            format,
            labels,
        } => {
            config.validate()?;
            let registry = CodecRegistry::new(&config.codec)?;
            let response = read_response(&registry, &input, format)?;
            print_summary(&response, labels);
        }
    }

    Ok(())
}

fn read_response(registry: &CodecRegistry, path: &Path, format: WireFormat) -> Result<QueryResponse> {
    let body = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;

    let started = Instant::now();
    let response = registry
        .decode(Some(format.media_type()), &body, &CallContext::background())
        .with_context(|| format!("failed to decode {} as {}", path.display(), format))?;
    debug!("Decoded {} bytes in {:?}", body.len(), started.elapsed());

    Ok(response)
}

fn print_summary(response: &QueryResponse, with_labels: bool) {
    println!("status:      {}", response.status);
    if let Some(error_type) = &response.error_type {
        println!("errorType:   {}", error_type);
    }
    if let Some(error) = &response.error {
        println!("error:       {}", error);
    }
    if let Some(result_type) = response.result_type() {
        println!("resultType:  {}", result_type);
        println!("series:      {}", response.series_count());
        println!("samples:     {}", response.sample_count());
    }
    if let Some(total) = response
        .data
        .as_ref()
        .and_then(|data| data.stats.as_ref())
        .and_then(|stats| stats.samples.as_ref())
        .and_then(|samples| samples.total_queryable_samples.as_ref())
    {
        println!("queryable:   {}", total);
    }
    for warning in &response.warnings {
        println!("warning:     {}", warning);
    }
    for info in &response.infos {
        println!("info:        {}", info);
    }

    if with_labels {
        match response.data.as_ref().map(|data| &data.result) {
            Some(ResultPayload::Matrix(streams)) => {
                for stream in streams {
                    println!("{} ({} samples)", stream.labels, stream.samples.len());
                }
            }
            Some(ResultPayload::Vector(samples)) => {
                for sample in samples {
                    println!("{} {}", sample.labels, sample.sample.value());
                }
            }
            _ => {}
        }
    }
}
