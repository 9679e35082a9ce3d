use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::Parser;
use confdump_core::export::{ContentEncoding, export_page};
use confdump_core::hierarchy::apply_hierarchy;
use confdump_core::rpc::{WikiRpc, XmlRpcClient};

#[derive(Debug, Parser)]
#[command(
    name = "confdump",
    version,
    about = "Export every page and attachment of a Confluence space over XML-RPC"
)]
struct Cli {
    #[arg(
        short = 'r',
        long = "rpcurl",
        value_name = "URL",
        help = "XML-RPC endpoint, e.g. https://host/confluence/rpc/xmlrpc"
    )]
    rpcurl: String,
    #[arg(short = 'u', long = "user", value_name = "NAME")]
    user: String,
    #[arg(short = 'p', long = "pass", value_name = "PASSWORD")]
    pass: String,
    #[arg(short = 's', long = "space", value_name = "KEY")]
    space: String,
    #[arg(short = 'o', long = "output", value_name = "DIR", default_value = ".")]
    output: PathBuf,
    #[arg(
        long,
        help = "Write rendered pages as-is instead of dropping non-ASCII characters"
    )]
    strict_encoding: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let encoding = if cli.strict_encoding {
        ContentEncoding::Utf8
    } else {
        ContentEncoding::AsciiLossy
    };

    println!("rpcurl: {}", cli.rpcurl);
    println!("user: {}", cli.user);
    println!("space: {}", cli.space);
    println!("output: {}", cli.output.display());
    println!("started_at_unix: {}", now_unix_seconds());

    let started = Instant::now();
    let client = XmlRpcClient::new(&cli.rpcurl)?;
    let token = client.login(&cli.user, &cli.pass)?;
    let pages = client.get_pages(&token, &cli.space)?;
    println!("There are {} pages in {}", pages.len(), cli.space);

    let mut exported = Vec::with_capacity(pages.len());
    for (number, page) in pages.iter().enumerate() {
        let export = export_page(&client, &token, &cli.space, page, &cli.output, encoding)?;
        println!(
            "Downloaded page {}/{} with {} attachments",
            number + 1,
            pages.len(),
            export.attachment_count
        );
        exported.push(export.record);
    }

    println!("Moving folders...");
    apply_hierarchy(&cli.output, &exported)?;

    println!("Total time: {:.2?}", started.elapsed());
    println!("Done.");
    Ok(())
}

fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
