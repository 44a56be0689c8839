//! peqhid - read and write PEQ settings on a FiiO / JadeAudio USB device.
//!
//! Usage: `peqhid [pull | slot | enable <slot> | disable]`. Results are
//! printed as JSON on stdout; logs go to stderr.

use anyhow::{Result, bail};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

/// What to do with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    /// Print filters, global gain and current slot
    Pull,
    /// Print the current slot
    Slot,
    /// Switch PEQ on at a slot
    Enable(u8),
    /// Switch PEQ off
    Disable,
}

fn parse_action(args: &[String]) -> Result<Action> {
    match args {
        [] => Ok(Action::Pull),
        [cmd] if cmd == "pull" => Ok(Action::Pull),
        [cmd] if cmd == "slot" => Ok(Action::Slot),
        [cmd] if cmd == "disable" => Ok(Action::Disable),
        [cmd, slot] if cmd == "enable" => Ok(Action::Enable(slot.parse()?)),
        _ => bail!("usage: peqhid [pull | slot | enable <slot> | disable]"),
    }
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("peqhid={}", config.log.level).parse()?)
        .add_directive(format!("peqhid_hid={}", config.log.level).parse()?)
        .add_directive(format!("peqhid_core={}", config.log.level).parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if config.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;
    init_logging(&config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting peqhid");
    match &config.source {
        Some(path) => info!(?path, "Configuration loaded"),
        None => info!("Config file not found, using defaults"),
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let action = parse_action(&args)?;

    run(&config, action).await
}

#[cfg(feature = "hid")]
async fn run(config: &Config, action: Action) -> Result<()> {
    use anyhow::Context;
    use peqhid_hid::PeqSession;
    use peqhid_hid::device::{HidapiTransport, OpenOptions};

    let options = OpenOptions {
        vendor_id: config.device.vendor_id()?,
        product_name: config.device.product_name.clone(),
        output_report_id: config.device.output_report_id,
        strip_report_id: config.device.strip_report_id,
    };
    let (transport, inbound) = HidapiTransport::detect(&options).context("Failed to open device")?;
    let session = PeqSession::connect(transport, inbound, &config.registry(), config.session.clone())?;

    match action {
        Action::Pull => {
            let result = session.pull_from_device().await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Action::Slot => {
            let slot = session.current_slot().await?;
            let name = u8::try_from(slot).ok().and_then(|id| session.profile().slot_name(id));
            println!("{}", serde_json::json!({ "slot": slot, "name": name }));
        }
        Action::Enable(slot) => session.enable_peq(true, slot).await?,
        Action::Disable => session.enable_peq(false, 0).await?,
    }
    Ok(())
}

#[cfg(not(feature = "hid"))]
#[allow(clippy::unused_async)]
async fn run(config: &Config, action: Action) -> Result<()> {
    bail!(
        "peqhid was built without HID support; rebuild with `--features hid` to run {action:?} on {:04x}",
        config.device.vendor_id()?
    )
}
