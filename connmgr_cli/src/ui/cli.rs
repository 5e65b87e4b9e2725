use clap::{Parser, Subcommand};
use log::info;

use connmgr_core::{
    AppContext, ConnectionRecord, ConnectionStore, ConnectivityProbe, KeyProvisioner, SshOptions,
    StopOutcome, TunnelError, TunnelLaunch, TunnelRequest, TunnelState, TunnelSupervisor,
};

use crate::ui::prompt::{Prompter, StdinPrompter};

/// Default forwarded port (the Ollama API).
const DEFAULT_FORWARD_PORT: u16 = 11434;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "connmgr",
    version,
    about = "Manage SSH tunnel connections to remote servers",
    subcommand_required = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Interactive setup for a new connection
    Setup,
    /// Generate the SSH key for a connection
    SetupKey {
        /// Connection name
        name: String,
        /// Regenerate even if a key already exists
        #[arg(long, short)]
        force: bool,
    },
    /// Test SSH connectivity using the connection's key
    VerifyKey {
        /// Connection name
        name: String,
        /// Show the SSH client's diagnostic output
        #[arg(long, short)]
        verbose: bool,
    },
    /// List all configured connections
    List,
    /// Start the tunnel for a configured connection
    Connect {
        /// Connection name
        name: String,
        /// Local port to forward
        #[arg(long, short = 'l', default_value_t = DEFAULT_FORWARD_PORT)]
        local_port: u16,
        /// Remote port to forward to
        #[arg(long, default_value_t = DEFAULT_FORWARD_PORT)]
        remote_port: u16,
        /// Run attached instead of in the background
        #[arg(long, short)]
        foreground: bool,
        /// Skip the pre-flight connectivity check
        #[arg(long)]
        no_verify: bool,
    },
    /// Check tunnel status
    Status {
        /// Connection name (all registered tunnels when omitted)
        name: Option<String>,
    },
    /// Stop a running tunnel
    Stop {
        /// Connection name
        name: String,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
    /// Delete a connection configuration
    Delete {
        /// Connection name
        name: String,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

/// Process exit code for each error kind, so scripts can branch on failures.
pub fn exit_code(e: &TunnelError) -> i32 {
    match e {
        TunnelError::NotFound(_) => 2,
        TunnelError::AlreadyRunning { .. } => 3,
        TunnelError::PortInUse(_) => 4,
        TunnelError::TunnelSetup { .. } => 5,
        TunnelError::KeyGen(_) => 6,
        TunnelError::ProcessSignal { .. } => 7,
        TunnelError::Storage { .. } => 8,
        _ => 1,
    }
}

/// Everything a command needs, built once per invocation.
struct Invocation {
    store: ConnectionStore,
    keys: KeyProvisioner,
    probe: ConnectivityProbe,
    supervisor: TunnelSupervisor,
    prompter: StdinPrompter,
}

impl Invocation {
    fn new() -> Result<Self, TunnelError> {
        let ctx = AppContext::new()?;
        Ok(Self {
            store: ConnectionStore::open(ctx.config_file.clone())?,
            keys: KeyProvisioner::new(ctx.keys_dir.clone()),
            probe: ConnectivityProbe::new(SshOptions::default()),
            supervisor: TunnelSupervisor::new(&ctx),
            prompter: StdinPrompter,
        })
    }

    fn require(&self, name: &str) -> Result<ConnectionRecord, TunnelError> {
        self.store
            .get(name)?
            .ok_or_else(|| TunnelError::NotFound(name.to_string()))
    }
}

pub async fn run_cli(args: Args) -> Result<i32, TunnelError> {
    let inv = Invocation::new()?;
    match args.command {
        CliCommand::Setup => cmd_setup(&inv),
        CliCommand::SetupKey { name, force } => cmd_setup_key(&inv, &name, force).await,
        CliCommand::VerifyKey { name, verbose } => cmd_verify_key(&inv, &name, verbose).await,
        CliCommand::List => cmd_list(&inv),
        CliCommand::Connect {
            name,
            local_port,
            remote_port,
            foreground,
            no_verify,
        } => cmd_connect(&inv, &name, local_port, remote_port, foreground, no_verify).await,
        CliCommand::Status { name } => cmd_status(&inv, name.as_deref()),
        CliCommand::Stop { name, force } => cmd_stop(&inv, &name, force),
        CliCommand::Delete { name, force } => cmd_delete(&inv, &name, force),
    }
}

fn cmd_setup(inv: &Invocation) -> Result<i32, TunnelError> {
    println!("Connection setup");

    let name = inv.prompter.prompt_text(
        "Enter connection name:",
        &|s| ConnectionRecord::is_valid_name(s),
        "Name must be non-empty and alphanumeric",
    )?;
    let host = inv.prompter.prompt_text(
        "Server hostname:",
        &|s| !s.is_empty(),
        "Hostname cannot be empty",
    )?;
    let port = inv.prompter.prompt_number("Server port:", 1, 65535, 22)? as u16;

    let record = ConnectionRecord::new(name.clone(), host.clone(), port);
    inv.store.save(&record)?;

    println!("\nSetup complete!");
    println!("  name: {name}");
    println!("  host: {host}");
    println!("  port: {port}");
    println!("\nNext steps:");
    println!("  1. Run 'connmgr setup-key {name}' to generate the SSH key");
    Ok(0)
}

async fn cmd_setup_key(inv: &Invocation, name: &str, force: bool) -> Result<i32, TunnelError> {
    inv.require(name)?;
    inv.keys.ensure_key(name, force).await?;

    if let Some(pub_key) = inv.keys.public_key_content(name)? {
        println!("Public key for '{name}':\n");
        println!("  {pub_key}\n");
        println!("Next steps:");
        println!("  1. Add this public key to ~/.ssh/authorized_keys on your server");
        println!("  2. Run 'connmgr verify-key {name}' to test the connection");
    }
    Ok(0)
}

async fn cmd_verify_key(inv: &Invocation, name: &str, verbose: bool) -> Result<i32, TunnelError> {
    let record = inv.require(name)?;
    let key_path = inv.keys.key_path(name);
    if !key_path.exists() {
        println!("No key found for '{name}'. Run 'connmgr setup-key {name}' first.");
        return Ok(1);
    }

    let report = inv
        .probe
        .test(&record.host, record.port, &key_path, verbose)
        .await?;
    if let Some(diag) = &report.diagnostics {
        println!("SSH debug output:\n{diag}\n");
    }
    if report.ok {
        println!("Connection to '{name}' verified.");
        Ok(0)
    } else {
        println!("SSH connection test failed. Please verify the public key is");
        println!("installed in ~/.ssh/authorized_keys on {}.", record.host);
        Ok(1)
    }
}

fn cmd_list(inv: &Invocation) -> Result<i32, TunnelError> {
    let connections = inv.store.list()?;
    if connections.is_empty() {
        println!("No connections configured yet.");
        return Ok(0);
    }

    println!("{:<16} {:<24} {:<6} {}", "NAME", "HOST", "PORT", "MODIFIED");
    for (name, record) in connections {
        let modified = record
            .last_modified
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "{:<16} {:<24} {:<6} {}",
            name, record.host, record.port, modified
        );
    }
    Ok(0)
}

async fn cmd_connect(
    inv: &Invocation,
    name: &str,
    local_port: u16,
    remote_port: u16,
    foreground: bool,
    no_verify: bool,
) -> Result<i32, TunnelError> {
    let record = inv.require(name)?;
    let key = inv.keys.ensure_key(name, false).await?;

    if !no_verify {
        if let Some(pub_key) = inv.keys.public_key_content(name)? {
            println!("Public key for '{name}':\n\n  {pub_key}\n");
            let added = inv
                .prompter
                .confirm("Have you added the public key to the server?", false)?;
            if !added {
                println!("Please add the key and try connecting again.");
                return Ok(1);
            }
        }
        info!("Testing SSH connection to {}:{}", record.host, record.port);
        let report = inv
            .probe
            .test(&record.host, record.port, &key.private_key, false)
            .await?;
        if !report.ok {
            println!("SSH connection test failed. Please verify your key setup,");
            println!("or rerun with --no-verify to skip this check.");
            return Ok(1);
        }
    }

    let request = TunnelRequest {
        name: name.to_string(),
        host: record.host,
        port: record.port,
        key_path: key.private_key,
        local_port,
        remote_port,
    };
    match inv.supervisor.start(request, !foreground).await? {
        TunnelLaunch::Detached(handle) => {
            println!(
                "Connection started in background (PID: {})",
                handle.pid
            );
            println!("Forwarding localhost:{} -> {}:{}", handle.local_port, handle.host, handle.remote_port);
            println!("\nUse 'connmgr status {name}' to check status");
            println!("Use 'connmgr stop {name}' to disconnect");
            Ok(0)
        }
        TunnelLaunch::Foreground(tunnel) => {
            println!("Successfully connected to '{name}'!");
            println!(
                "Forwarding localhost:{} -> {}:{}",
                tunnel.handle.local_port, tunnel.handle.host, tunnel.handle.remote_port
            );
            println!("\nPress Ctrl+C to disconnect...");
            tunnel.wait().await?;
            println!("Connection terminated.");
            Ok(0)
        }
    }
}

fn cmd_status(inv: &Invocation, name: Option<&str>) -> Result<i32, TunnelError> {
    let states = inv.supervisor.status(name)?;
    if states.is_empty() {
        println!("No active connections");
        return Ok(0);
    }

    println!("{:<16} {:<8} STATUS", "NAME", "PID");
    for (name, state) in states {
        match state {
            TunnelState::Active { pid } => println!("{:<16} {:<8} running", name, pid),
            TunnelState::Absent => println!("{:<16} {:<8} stopped", name, "-"),
        }
    }
    Ok(0)
}

fn cmd_stop(inv: &Invocation, name: &str, force: bool) -> Result<i32, TunnelError> {
    let pid = match inv.supervisor.state(name)? {
        TunnelState::Absent => {
            println!("Connection '{name}' is not running");
            return Ok(0);
        }
        TunnelState::Active { pid } => pid,
    };

    if !force
        && !inv
            .prompter
            .confirm(&format!("Stop connection '{name}' (PID: {pid})?"), true)?
    {
        return Ok(0);
    }

    match inv.supervisor.stop(name)? {
        StopOutcome::Stopped { pid } | StopOutcome::AlreadyGone { pid } => {
            println!("Stopped connection '{name}' (PID: {pid})");
        }
        StopOutcome::NotRunning => println!("Connection '{name}' is not running"),
    }
    Ok(0)
}

fn cmd_delete(inv: &Invocation, name: &str, force: bool) -> Result<i32, TunnelError> {
    if !force
        && !inv
            .prompter
            .confirm(&format!("Delete connection '{name}'?"), false)?
    {
        return Ok(0);
    }

    if let TunnelState::Active { pid } = inv.supervisor.state(name)? {
        println!(
            "Warning: a tunnel for '{name}' is still running (PID: {pid}). Stop it with 'connmgr stop {name}'."
        );
    }

    if inv.store.delete(name)? {
        println!("Deleted connection '{name}'");
        Ok(0)
    } else {
        Err(TunnelError::NotFound(name.to_string()))
    }
}
