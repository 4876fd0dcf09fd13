use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uswid::{generate_tag_id, Aggregator, FileFormat, ParentPolicy};

#[derive(Parser)]
#[command(name = "uswid-cli")]
#[command(about = "Aggregate CoSWID/SWID tags and embed them as uSWID containers")]
#[command(version)]
struct Cli {
    /// Show debugging output
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge input tags into one output file
    Convert {
        #[command(flatten)]
        load: LoadArgs,

        /// Output file; the extension picks the format
        #[arg(short, long)]
        output: PathBuf,

        /// Compress the cbor or uswid record stream with zlib
        #[arg(short = 'z', long)]
        compress: bool,
    },
    /// Print input tags as JSON
    Print {
        #[command(flatten)]
        load: LoadArgs,
    },
    /// Print the tag id generated for a name
    GenerateTagId {
        #[arg(short, long)]
        name: String,
    },
    /// Record a payload file (name, size and SHA-256) in a tag
    AddPayloadFile {
        /// File holding a single tag
        #[arg(short, long)]
        input: PathBuf,

        /// Payload file to describe
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short = 'z', long)]
        compress: bool,

        /// Input format (json, xml, cbor, uswid, pc)
        #[arg(long, value_parser = parse_format)]
        format: Option<FileFormat>,
    },
}

#[derive(Args)]
struct LoadArgs {
    /// Input files (json, xml, cbor, uswid, pc or any binary holding a
    /// uSWID container)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Single tag that requires every input tag
    #[arg(short, long, conflicts_with_all = ["link_first", "link_each"])]
    parent: Option<PathBuf>,

    /// Make the first tag of the collection require all the others
    #[arg(long, conflicts_with = "link_each")]
    link_first: bool,

    /// Make the first tag of each input require the rest of that input
    #[arg(long)]
    link_each: bool,

    /// Input format, instead of guessing from the extension
    #[arg(long, value_parser = parse_format)]
    format: Option<FileFormat>,
}

impl LoadArgs {
    fn parent_policy(&self) -> ParentPolicy {
        if let Some(parent) = &self.parent {
            ParentPolicy::ParentFile(parent.clone())
        } else if self.link_first {
            ParentPolicy::FirstOfCollection
        } else if self.link_each {
            ParentPolicy::FirstOfEachSource
        } else {
            ParentPolicy::None
        }
    }

    fn aggregator(&self) -> Aggregator {
        Aggregator::new()
            .with_parent_policy(self.parent_policy())
            .with_input_format(self.format)
    }
}

fn parse_format(token: &str) -> Result<FileFormat, String> {
    token.parse().map_err(|err: uswid::UswidError| err.to_string())
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Command::Convert {
            load,
            output,
            compress,
        } => {
            load.aggregator()
                .with_compress(compress)
                .convert(load.inputs.as_slice(), &output)?;
        }
        Command::Print { load } => {
            println!("{}", load.aggregator().print(load.inputs.as_slice())?);
        }
        Command::GenerateTagId { name } => {
            println!("{}", generate_tag_id(&name));
        }
        Command::AddPayloadFile {
            input,
            file,
            output,
            compress,
            format,
        } => {
            Aggregator::new()
                .with_compress(compress)
                .with_input_format(format)
                .add_payload_file(&input, &file, &output)?;
        }
    }

    Ok(())
}
