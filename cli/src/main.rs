use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{ArgAction, Parser};
use dialoguer::Select;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use nfcsdk::ntag::{self, CapabilityContainer, Tag, Version};
use nfcsdk::pcsc::PcscManager;
use nfcsdk::scard::CardStatus;
use nfcsdk::{BoxError, CancellationToken, Card, Reader, Sdk};

/// First page of the user memory on NTAG21x.
const USER_MEMORY_PAGE: u8 = 4;

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("{0}")]
    Nfc(#[from] nfcsdk::Error),

    #[error("reader selection needs either --reader, --all or --interactive, not several")]
    ConflictingSelection,

    #[error("failed to install the signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Watch PC/SC readers and print information about presented NTAG21x tags.
#[derive(Parser, Debug)]
#[command(name = "nfcsdk", version)]
struct Args {
    /// Use the readers whose name contains this text
    #[arg(long)]
    reader: Option<String>,

    /// Use every reader
    #[arg(long)]
    all: bool,

    /// Choose the reader from a prompt
    #[arg(long, short)]
    interactive: bool,

    /// Stop after the first card
    #[arg(long)]
    once: bool,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Dump this many pages of user memory
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=222))]
    pages: Option<u8>,

    /// Read the originality signature
    #[arg(long)]
    signature: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// More output per occurrence
    #[arg(long, short, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Serialize)]
struct Report {
    status: CardStatus,
    uid: String,
    version: Version,
    capability_container: CapabilityContainer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pages: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    if [args.reader.is_some(), args.all, args.interactive]
        .into_iter()
        .filter(|set| *set)
        .count()
        > 1
    {
        return Err(Error::ConflictingSelection);
    }

    let token = CancellationToken::new();
    cancel_on_signal(&token)?;

    let sdk = Sdk::new(Arc::new(PcscManager), token.clone(), None)?;

    if let Some(name) = args.reader.clone() {
        sdk.select_reader(move |readers| select_by_name(readers, &name));
    } else if args.all {
        sdk.select_reader(|readers| {
            Ok(readers
                .into_iter()
                .map(|mut reader| {
                    reader.in_use = true;
                    reader
                })
                .collect())
        });
    } else if args.interactive {
        sdk.select_reader(select_interactively);
    }

    if let Some(secs) = args.timeout {
        let token = token.clone();
        thread::spawn(move || {
            let waited = token.receiver().recv_timeout(Duration::from_secs(secs));
            if waited.is_err() && !token.is_cancelled() {
                info!("timed out after {} seconds", secs);
                token.cancel();
            }
        });
    }

    let handler_token = token.clone();
    sdk.on_card_present(move |card| {
        let result = report(card, &args);
        if args.once {
            handler_token.cancel();
        }

        let report = result?;
        match args.json {
            true => println!("{}", serde_json::to_string_pretty(&report)?),
            _ => print_report(&report),
        }

        Ok(())
    });

    info!("waiting for cards");
    Ok(sdk.run()?)
}

/// Cancels the token on SIGINT, SIGTERM or SIGHUP so the readers are released properly.
fn cancel_on_signal(token: &CancellationToken) -> Result<()> {
    let token = token.clone();
    ctrlc::set_handler(move || interrupt(&token))?;

    Ok(())
}

fn interrupt(token: &CancellationToken) {
    match token.is_cancelled() {
        true => debug!("already shutting down"),
        _ => {
            info!("interrupted, shutting down");
            token.cancel();
        }
    }
}

fn select_by_name(
    readers: Vec<Reader>,
    name: &str,
) -> std::result::Result<Vec<Reader>, BoxError> {
    let readers = readers
        .into_iter()
        .map(|mut reader| {
            reader.in_use = reader.name().contains(name);
            reader
        })
        .collect::<Vec<_>>();

    match readers.iter().any(|reader| reader.in_use) {
        true => Ok(readers),
        _ => Err(format!("no reader matches {:?}", name).into()),
    }
}

fn select_interactively(mut readers: Vec<Reader>) -> std::result::Result<Vec<Reader>, BoxError> {
    let names = readers
        .iter()
        .map(|reader| format!("{}: {}", reader.id(), reader.name()))
        .collect::<Vec<_>>();

    let index = Select::new()
        .with_prompt("Select a reader")
        .items(&names)
        .default(0)
        .interact()?;
    readers[index].in_use = true;

    Ok(readers)
}

fn report(card: &Card<PcscManager>, args: &Args) -> std::result::Result<Report, BoxError> {
    let status = card.current_status();
    let uid = card.uid()?;
    debug!("UID: {}", hex::encode(&uid));

    let version = card.version()?;
    let capability_container = card.capability_container()?;

    let pages = match args.pages {
        Some(n) => {
            let end = USER_MEMORY_PAGE.saturating_add(n - 1);
            let response = card.transmit(&ntag::fast_read(USER_MEMORY_PAGE, end))?;
            Some(hex::encode_upper(response.payload()))
        }
        None => None,
    };

    let signature = match args.signature {
        true => Some(hex::encode_upper(card.signature()?)),
        _ => None,
    };

    Ok(Report {
        status,
        uid: hex::encode_upper(uid),
        version,
        capability_container,
        pages,
        signature,
    })
}

fn print_report(report: &Report) {
    let version = &report.version;
    let cc = &report.capability_container;

    println!("Reader:           {}", report.status.reader);
    println!("ATR:              {}", hex::encode_upper(&report.status.atr));
    println!("UID:              {}", report.uid);
    println!("Vendor:           {}", version.vendor_id);
    println!("Product:          {} ({})", version.product_type, version.product_subtype);
    println!("Version:          {}.{}", version.major_version, version.minor_version);
    println!("Storage:          {}", version.storage_size);
    println!("Protocol:         {}", version.protocol_type);
    println!("Version CRC:      {}", if version.valid { "ok" } else { "invalid" });
    println!("Tag type:         {}", cc.tag_type);
    println!("Mapping version:  {}", cc.version);
    println!("NDEF memory:      {}", cc.memory_size);
    println!("Read only:        {}", cc.read_only);

    if let Some(pages) = &report.pages {
        println!("Pages:            {}", pages);
    }
    if let Some(signature) = &report.signature {
        println!("Signature:        {}", signature);
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_args() {
        Args::command().debug_assert();

        let args = Args::try_parse_from(["nfcsdk", "--reader", "ACR122", "--once", "-vv"]).unwrap();

        assert_eq!(Some("ACR122".to_owned()), args.reader);
        assert!(args.once);
        assert_eq!(2, args.verbose);
    }

    #[test]
    fn test_cancel_on_signal() {
        let token = CancellationToken::new();

        cancel_on_signal(&token).unwrap();
        assert!(!token.is_cancelled());
        assert!(matches!(
            cancel_on_signal(&token),
            Err(Error::Signal(ctrlc::Error::MultipleHandlers)),
        ));

        interrupt(&token);
        assert!(token.is_cancelled());

        interrupt(&token);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_pages_range() {
        assert!(Args::try_parse_from(["nfcsdk", "--pages", "0"]).is_err());
        assert_eq!(
            Some(16),
            Args::try_parse_from(["nfcsdk", "--pages", "16"]).unwrap().pages,
        );
    }
}
