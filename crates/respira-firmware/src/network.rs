//! Wi-Fi station bring-up and the embassy-net stack

use embassy_net::{Config as NetConfig, DhcpConfig, Runner, Stack, StackResources};
use embassy_time::{Duration, Instant, Timer, with_timeout};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice};
use log::{error, info, warn};
use respira_core::config::{InternetConfig, PORTAL_TIMEOUT};
use static_cell::StaticCell;
use thiserror_no_std::Error;

/// Sockets: DHCP, DNS and the broker session.
static STACK_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();

/// How often the keeper task checks the association.
const LINK_CHECK_PERIOD: Duration = Duration::from_secs(5);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Wi-Fi configuration rejected")]
    Config,
    #[error("Wi-Fi start failed")]
    Start,
    #[error("Wi-Fi association failed")]
    Connect,
    #[error("no network within {0} s")]
    Timeout(u64),
}

/// Build the DHCP stack, announcing `hostname`.
pub fn create_stack(
    device: WifiDevice<'static>,
    hostname: &str,
) -> (Stack<'static>, Runner<'static, WifiDevice<'static>>) {
    let mut dhcp = DhcpConfig::default();
    dhcp.hostname = hostname.try_into().ok();
    if dhcp.hostname.is_none() {
        warn!("Hostname '{}' rejected by DHCP client", hostname);
    }

    let resources = STACK_RESOURCES.init(StackResources::new());
    embassy_net::new(
        device,
        NetConfig::dhcpv4(dhcp),
        resources,
        Instant::now().as_ticks(),
    )
}

async fn join(
    wifi: &mut WifiController<'static>,
    stack: Stack<'static>,
    internet: &InternetConfig<'_>,
) -> Result<(), NetworkError> {
    let client = ClientConfig::default()
        .with_ssid(internet.ssid.into())
        .with_password(internet.password.into());

    wifi.set_config(&ModeConfig::Client(client)).map_err(|e| {
        error!("Wi-Fi set_config failed: {:?}", e);
        NetworkError::Config
    })?;
    wifi.start().map_err(|e| {
        error!("Wi-Fi start failed: {:?}", e);
        NetworkError::Start
    })?;

    info!("Joining '{}'", internet.ssid);
    wifi.connect().map_err(|e| {
        error!("Wi-Fi connect failed: {:?}", e);
        NetworkError::Connect
    })?;

    while !wifi.is_connected().unwrap_or(false) {
        Timer::after(Duration::from_millis(100)).await;
    }

    info!("Wi-Fi associated, waiting for DHCP");
    stack.wait_config_up().await;
    if let Some(config) = stack.config_v4() {
        info!("IP address: {}", config.address);
    }
    Ok(())
}

/// Associate and obtain an address, giving up after the provisioning timeout.
pub async fn join_with_timeout(
    wifi: &mut WifiController<'static>,
    stack: Stack<'static>,
    internet: &InternetConfig<'_>,
) -> Result<(), NetworkError> {
    match with_timeout(PORTAL_TIMEOUT, join(wifi, stack, internet)).await {
        Ok(result) => result,
        Err(_) => Err(NetworkError::Timeout(PORTAL_TIMEOUT.as_secs())),
    }
}

#[embassy_executor::task]
pub async fn net_runner(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}

/// Re-associates after the access point drops the station.
#[embassy_executor::task]
pub async fn wifi_keeper(mut wifi: WifiController<'static>) {
    loop {
        Timer::after(LINK_CHECK_PERIOD).await;

        if wifi.is_connected().unwrap_or(true) {
            continue;
        }

        warn!("Wi-Fi lost, re-associating");
        if let Err(e) = wifi.connect() {
            error!("Wi-Fi reconnect failed: {:?}", e);
        }
    }
}
