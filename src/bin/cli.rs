//! BlockVault CLI Client
//!
//! Command-line interface for interacting with a BlockVault server.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use blockvault::network::Client;
use blockvault::{Address, Result};
use clap::{Parser, Subcommand};

/// BlockVault CLI
#[derive(Parser, Debug)]
#[command(name = "blockvault-cli")]
#[command(about = "CLI for the BlockVault block store")]
struct Args {
    /// Server address
    #[arg(short, long, env = "BLOCKVAULT_SERVER", default_value = "127.0.0.1:7070")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch a block and write it to stdout
    Get {
        /// Hex address of the block
        address: Address,

        /// Strip the zero padding
        #[arg(short, long)]
        trim: bool,

        /// Only report whether the block exists
        #[arg(long)]
        exists: bool,
    },

    /// Store a block read from a file (or stdin) and print its address
    Put {
        /// Input file; stdin when omitted
        file: Option<PathBuf>,

        /// Fail unless the block hashes to this address
        #[arg(long)]
        expect: Option<Address>,
    },

    /// Remove a block
    Rm {
        /// Hex address of the block
        address: Address,

        /// Overwrite the slot before releasing it
        #[arg(long)]
        secure: bool,
    },

    /// Show used and total block counts
    Stat,

    /// List stored blocks
    Walk {
        /// Only blocks containing this text
        #[arg(short, long, default_value = "")]
        pattern: String,
    },

    /// Ping the server
    Ping,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut client = Client::connect(&args.server)?;

    match args.command {
        Commands::Get {
            address,
            trim,
            exists,
        } => {
            if exists {
                let found = client.contains(&address)?;
                println!("{}", if found { "present" } else { "absent" });
                return Ok(());
            }
            match client.get(&address)? {
                Some(block) => {
                    let bytes = if trim { block.trimmed() } else { block.as_bytes() };
                    let mut out = io::stdout().lock();
                    out.write_all(bytes)?;
                    out.flush()?;
                }
                None => {
                    eprintln!("(not found)");
                    std::process::exit(2);
                }
            }
        }
        Commands::Put { file, expect } => {
            let data = match file {
                Some(path) => fs::read(path)?,
                None => {
                    let mut buf = Vec::new();
                    io::stdin().lock().read_to_end(&mut buf)?;
                    buf
                }
            };
            let (address, inserted) = client.put(&data, expect.as_ref())?;
            println!("{} {}", address, if inserted { "stored" } else { "exists" });
        }
        Commands::Rm { address, secure } => {
            let deleted = client.remove(&address, secure)?;
            println!("{}", if deleted { "removed" } else { "(not found)" });
        }
        Commands::Stat => {
            let stat = client.stat()?;
            println!("used:  {}", stat.used);
            println!("total: {}", stat.total);
            println!("free:  {}", stat.free());
        }
        Commands::Walk { pattern } => {
            let count = client.walk_each(false, pattern.as_bytes(), |item| {
                println!("{}", item.address);
                Ok(())
            })?;
            eprintln!("{} blocks", count);
        }
        Commands::Ping => {
            client.ping()?;
            println!("PONG");
        }
    }

    Ok(())
}
