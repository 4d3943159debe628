use std::io::{self, Write};
use std::net::TcpStream;

use clap::Parser;
use vaultview::decode::DecodedView;
use vaultview::parser::{self, Command};
use vaultview::protocol::{self, *};
use vaultview::session::{EntrySnapshot, HistorySelection};
use vaultview::template::{Template, TemplateId};
use vaultview::CompactionStats;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Interactive client for a vaultview node", long_about = None)]
struct Args {
    #[clap(long, default_value = "127.0.0.1:9100")]
    host: String,
}

fn main() {
    let args = Args::parse();
    print_banner();

    // One connection is one viewing session on the node
    let mut stream = match TcpStream::connect(&args.host) {
        Ok(stream) => {
            println!("[\u{2713}] Connected to vaultview at {}!", args.host);
            stream
        }
        Err(_) => {
            println!("[\u{2717}] Could not connect to node at {}.", args.host);
            println!("    Start one with 'cargo run --release --bin vaultview' in another terminal.");
            return;
        }
    };
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        print!("vault> ");
        if io::stdout().flush().is_err() { break; }
        buffer.clear();

        match stdin.read_line(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if buffer.trim().is_empty() { continue; }

        match parser::parse_command(&buffer) {
            Ok(Command::Exit) => break,
            Ok(cmd) => {
                if let Err(e) = execute_command(&mut stream, cmd) {
                    println!("[\u{26a0}\u{fe0f} Error] {}", e);
                }
            }
            Err(e) => {
                println!("[\u{2717} Syntax Error] {}", e);
                if buffer.to_uppercase().starts_with("PUT") {
                    println!("    \u{2139}\u{fe0f}  Hint: Try 'PUT SET title=\"Mail\", password*=\"secret\"'");
                } else if buffer.to_uppercase().starts_with("LOAD") {
                    println!("    \u{2139}\u{fe0f}  Hint: Try 'LOAD 'uuid' AT 0'");
                }
            }
        }
    }
}

fn print_banner() {
    println!("\n==================================================");
    println!("   vaultview CLI - Versioned Entry Viewer");
    println!("==================================================\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. PUT:       PUT ['uuid'] [TEMPLATE 'uuid'] SET title=\"...\", password*=\"...\"");
    println!("2. LOAD:      LOAD 'uuid' [AT n | AT LIVE]");
    println!("3. RELOAD:    RELOAD");
    println!("4. SHOW:      SHOW");
    println!("5. PICK:      PICK n");
    println!("6. TEMPLATE:  TEMPLATE \"Title\" FIELDS [name, secret*, internal!]");
    println!("7. DELETE:    DELETE 'uuid'");
    println!("8. COMPACT:   COMPACT [KEEP n] [MAX_SIZE bytes]");
    println!("9. SEARCH:    SEARCH \"term\" [MATCH CASE]");
    println!("10. EXIT:     Quit\n");
}

fn execute_command(stream: &mut TcpStream, cmd: Command) -> Result<(), String> {
    match cmd {
        Command::Help => { print_help(); Ok(()) },
        Command::Put { id, template, fields } => {
            let body = serde_json::to_vec(&PutRequest { id, template, fields }).map_err(|e| e.to_string())?;
            let (status, reply) = call(stream, OP_PUT, &body)?;
            expect_ok(status, "Put rejected")?;
            let put: PutReply = serde_json::from_slice(&reply).map_err(|e| e.to_string())?;
            println!("[\u{2713} OK] Stored version of {} (offset {})", put.id, put.offset);
            Ok(())
        },
        Command::Load { id, position } => {
            let (status, reply) = call(stream, OP_LOAD, &protocol::encode_load(id, position))?;
            print_publication(status, &reply)
        },
        Command::Reload => {
            let (status, reply) = call(stream, OP_RELOAD, &[])?;
            if status == STATUS_NOT_FOUND {
                println!("[\u{2717}] Nothing loaded yet.");
                return Ok(());
            }
            print_publication(status, &reply)
        },
        Command::Show => {
            let (status, reply) = call(stream, OP_SNAPSHOT, &[])?;
            if status == STATUS_NOT_FOUND {
                println!("[\u{2717}] Nothing loaded yet.");
                return Ok(());
            }
            print_publication(status, &reply)
        },
        Command::Pick { position } => {
            let (status, reply) = call(stream, OP_PICK, &position.to_le_bytes())?;
            if status == STATUS_NOT_FOUND {
                println!("[\u{2717}] No history item {}.", position);
                return Ok(());
            }
            expect_ok(status, "Pick rejected")?;
            let pick: HistorySelection = serde_json::from_slice(&reply).map_err(|e| e.to_string())?;
            println!("[\u{2713}] Picked history item {} of {}", pick.history_position, pick.record_id);
            print_view(&pick.entry);
            println!("    Open it with: LOAD '{}' AT {}", pick.record_id, pick.history_position);
            Ok(())
        },
        Command::Template { title, fields } => {
            let body = serde_json::to_vec(&Template::new(title, fields)).map_err(|e| e.to_string())?;
            let (status, reply) = call(stream, OP_TEMPLATE, &body)?;
            expect_ok(status, "Template rejected")?;
            let id: TemplateId = serde_json::from_slice(&reply).map_err(|e| e.to_string())?;
            println!("[\u{2713} OK] Registered template {}", id);
            Ok(())
        },
        Command::Delete { id } => {
            let (status, _) = call(stream, OP_DELETE, id.0.as_bytes())?;
            match status {
                STATUS_OK => println!("[\u{2713} OK] Deleted {}", id),
                STATUS_NOT_FOUND => println!("[\u{2717}] ID Not Found."),
                _ => return Err("Delete Failed".into()),
            }
            Ok(())
        },
        Command::Compact(retention) => {
            let body = serde_json::to_vec(&retention).map_err(|e| e.to_string())?;
            let (status, reply) = call(stream, OP_COMPACT, &body)?;
            expect_ok(status, "Compaction Failed")?;
            let stats: CompactionStats = serde_json::from_slice(&reply).map_err(|e| e.to_string())?;
            println!("[\u{2713} OK] Kept {} versions, dropped {}", stats.moved, stats.dropped);
            Ok(())
        },
        Command::Search(query) => {
            let body = serde_json::to_vec(&query).map_err(|e| e.to_string())?;
            let (status, reply) = call(stream, OP_SEARCH, &body)?;
            expect_ok(status, "Search Failed")?;
            let hits: Vec<DecodedView> = serde_json::from_slice(&reply).map_err(|e| e.to_string())?;
            if hits.is_empty() {
                println!("[\u{2717}] No entries match \"{}\".", query.term);
            }
            for view in &hits {
                println!("  {} | \"{}\"", view.id, view.title);
            }
            Ok(())
        },
        Command::Exit => Ok(()),
    }
}

// --- NETWORK HELPERS ---

fn call(stream: &mut TcpStream, op: u8, body: &[u8]) -> Result<(u8, Vec<u8>), String> {
    protocol::send_request(stream, op, body).map_err(|e| format!("Connection lost: {}", e))
}

fn expect_ok(status: u8, message: &str) -> Result<(), String> {
    if status == STATUS_OK { Ok(()) } else { Err(message.to_string()) }
}

fn print_publication(status: u8, reply: &[u8]) -> Result<(), String> {
    match status {
        STATUS_OK => {
            let snapshot: EntrySnapshot = serde_json::from_slice(reply).map_err(|e| e.to_string())?;
            print_snapshot(&snapshot);
            Ok(())
        }
        STATUS_UNCHANGED => {
            println!("[\u{2717}] Entry not found; previous view kept.");
            Ok(())
        }
        _ => Err("Server Rejected Request".into()),
    }
}

fn print_snapshot(snapshot: &EntrySnapshot) {
    let at = if snapshot.history_position < 0 {
        "live".to_string()
    } else {
        format!("history #{}", snapshot.history_position)
    };
    println!("\n{} ({}) | template: {}", snapshot.record_id, at, snapshot.template.title);
    print_view(&snapshot.entry);

    println!("  History ({} versions):", snapshot.history.len());
    for (i, view) in snapshot.history.iter().enumerate() {
        println!("    [{}] modified {} | \"{}\"", i, view.modified, view.title);
    }
    println!();
}

fn print_view(view: &DecodedView) {
    for field in view.visible_fields() {
        let shown = if field.protected { "\u{2022}".repeat(8) } else { field.value.clone() };
        println!("  {:<12} {}", field.name, shown);
    }
}
