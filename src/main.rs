use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod arrangement;
mod channel_list;
mod config;
mod diff;
mod error;
mod instrument;
mod relay;
mod simulator;
mod switch;
mod transport;

use config::Config;
use switch::{Switch, on_off};
use transport::{LineTransport, Transport};

pub type Result<T> = anyhow::Result<T>;

#[derive(Parser)]
#[command(name = "qswitch")]
#[command(about = "Relay switch controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,

    /// Path to a JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// host:port of the switch (overrides the config file)
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// Talk to an in-memory simulated switch instead of hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a channel list with every relay spelled out.
    Expand { list: String },

    /// Print a channel list in its most compact form.
    Compress { list: String },

    /// Print the commands that would move BEFORE to AFTER.
    Diff { before: String, after: String },

    /// Print the instrument identification.
    Identify,

    /// Print the relay state.
    State {
        /// One item per relay instead of merged ranges
        #[arg(long)]
        expanded: bool,
    },

    /// Drive the switch to exactly the given channel list.
    Set { list: String },

    /// Close the given relays, keeping the rest.
    Close { list: String },

    /// Open the given relays, keeping the rest.
    Open { list: String },

    /// Ground lines (close tap 0).
    Ground {
        #[arg(required = true)]
        lines: Vec<String>,
    },

    /// Unground lines (open tap 0).
    Unground {
        #[arg(required = true)]
        lines: Vec<String>,
    },

    /// Connect lines (close tap 9).
    Connect {
        #[arg(required = true)]
        lines: Vec<String>,
    },

    /// Disconnect lines (open tap 9).
    Disconnect {
        #[arg(required = true)]
        lines: Vec<String>,
    },

    /// Route a line to a breakout tap.
    BreakOut { line: String, tap: String },

    /// Release a line from a breakout tap.
    UnbreakOut { line: String, tap: String },

    /// Reset the switch to power-on state.
    Reset,

    /// Abort ongoing relay activity.
    Abort,

    /// Retrieve and clear the device error queue.
    Errors {
        /// Only the oldest queued error
        #[arg(long)]
        next: bool,
    },

    /// Print, or turn on or off, saving the relay state across power cycles.
    AutoSave { value: Option<Toggle> },

    /// Print, or turn on or off, the beep on device errors.
    ErrorIndicator { value: Option<Toggle> },

    /// Print responses the device sent that nobody read.
    ClearQueue,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn is_on(self) -> bool {
        matches!(self, Toggle::On)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "qswitch=debug" } else { "qswitch=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?,
        )
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    if cli.address.is_some() {
        config.address = cli.address.clone();
    }

    let settings = config.switch_settings();
    match cli.cmd {
        Commands::Expand { list } => {
            settings.check_channel_list(&list)?;
            println!("{}", channel_list::expand_channel_list(&list)?);
        }
        Commands::Compress { list } => {
            settings.check_channel_list(&list)?;
            println!("{}", channel_list::compress_channel_list(&list)?);
        }
        Commands::Diff { before, after } => {
            let before = settings.parse_channel_list(&before)?;
            let after = settings.parse_channel_list(&after)?;
            let d = diff::diff(&before, &after);
            if !d.to_close.is_empty() {
                println!("clos {}", channel_list::to_compressed(&d.to_close));
            }
            if !d.to_open.is_empty() {
                println!("open {}", channel_list::to_compressed(&d.to_open));
            }
        }
        cmd => {
            let mut switch = Switch::open(connect(&config, cli.simulate)?, settings)?;
            switch.arrange(config.arrangement.clone());
            run_device_command(&mut switch, cmd)?;
        }
    }

    Ok(())
}

fn connect(config: &Config, simulate: bool) -> Result<Box<dyn Transport>> {
    use anyhow::Context;

    if simulate {
        return Ok(Box::new(simulator::Simulator::new(config.lines)));
    }

    let Some(address) = config.address.as_deref() else {
        anyhow::bail!("no switch address: pass --address, set \"address\" in the config, or use --simulate");
    };
    let stream = std::net::TcpStream::connect(address).with_context(|| format!("connect to {}", address))?;
    stream.set_write_timeout(Some(config.timeout()))?;
    let transport = LineTransport::new(stream)
        .with_line_ending(&config.line_ending)
        .with_timeouts(config.timeout(), config.flush_timeout())?;
    Ok(Box::new(transport))
}

fn run_device_command<T: Transport>(switch: &mut Switch<T>, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Identify => {
            let id = switch.identify()?;
            println!("vendor:   {}", id.vendor);
            println!("model:    {}", id.model);
            println!("serial:   {}", id.serial);
            println!("firmware: {}", id.firmware);
            return Ok(());
        }
        Commands::State { expanded: true } => {
            println!("{}", channel_list::to_expanded(switch.relays()));
            return Ok(());
        }
        Commands::State { expanded: false } => {}
        Commands::Set { list } => {
            switch.set_state_str(&list)?;
        }
        Commands::Close { list } => {
            let relays = switch.settings().parse_channel_list(&list)?;
            switch.close_relays(&relays)?;
        }
        Commands::Open { list } => {
            let relays = switch.settings().parse_channel_list(&list)?;
            switch.open_relays(&relays)?;
        }
        Commands::Ground { lines } => {
            switch.ground(&lines)?;
        }
        Commands::Unground { lines } => {
            switch.unground(&lines)?;
        }
        Commands::Connect { lines } => {
            switch.connect(&lines)?;
        }
        Commands::Disconnect { lines } => {
            switch.disconnect(&lines)?;
        }
        Commands::BreakOut { line, tap } => {
            switch.break_out(&line, &tap)?;
        }
        Commands::UnbreakOut { line, tap } => {
            switch.unbreak_out(&line, &tap)?;
        }
        Commands::Reset => switch.reset()?,
        Commands::Abort => switch.abort()?,
        Commands::Errors { next } => {
            let errors = if next { switch.error()? } else { switch.errors()? };
            println!("{}", errors);
            return Ok(());
        }
        Commands::AutoSave { value } => {
            match value {
                Some(value) => switch.set_auto_save(value.is_on())?,
                None => println!("{}", on_off(switch.auto_save()?)),
            }
            return Ok(());
        }
        Commands::ErrorIndicator { value } => {
            match value {
                Some(value) => switch.set_error_indicator(value.is_on())?,
                None => println!("{}", on_off(switch.error_indicator()?)),
            }
            return Ok(());
        }
        Commands::ClearQueue => {
            for line in switch.clear_read_queue()? {
                println!("{}", line);
            }
            return Ok(());
        }
        Commands::Expand { .. } | Commands::Compress { .. } | Commands::Diff { .. } => {
            unreachable!("offline commands are handled before connecting")
        }
    }

    debug!(synchronized = switch.is_synchronized(), "cached state");
    println!("{}", switch.state());
    Ok(())
}
