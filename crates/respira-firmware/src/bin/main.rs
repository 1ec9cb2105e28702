#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_time::{Duration, Instant, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info, warn};
use static_cell::StaticCell;

use respira_core::app_state::{AppError, AppRunState, bounded_message};
use respira_core::config::NodeConfig;
use respira_core::identity::{DeviceIdentity, TopicSet};
use respira_core::node::{Node, NodeIdentity, NodeIo};
use respira_core::sensors::{PwmPulseReader, SensorError};
use respira_firmware::climate::Sht40Climate;
use respira_firmware::device::EspDevice;
use respira_firmware::mqtt::MqttLink;
use respira_firmware::{network, provisioning};

/// Pause between two scheduler ticks.
const TICK_PERIOD: Duration = Duration::from_millis(50);

static DEVICE_ID: StaticCell<DeviceIdentity> = StaticCell::new();
static TOPICS: StaticCell<TopicSet> = StaticCell::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    esp_hal::system::software_reset()
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

fn restart_after(error: AppError) -> ! {
    error!("{}", error);
    info!("Run state: {}", AppRunState::Restarting.as_str());
    esp_hal::system::software_reset()
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Run state: {}", AppRunState::Booting.as_str());

    // Status LED idles high
    let indicator = Output::new(peripherals.GPIO2, Level::High, OutputConfig::default());
    let pwm_input = Input::new(
        peripherals.GPIO14,
        InputConfig::default().with_pull(Pull::None),
    );

    let mac = esp_hal::efuse::Efuse::mac_address();
    let device: &'static DeviceIdentity = DEVICE_ID.init(DeviceIdentity::from_mac(mac));
    let hostname = match device.hostname() {
        Ok(hostname) => hostname,
        Err(e) => restart_after(e.into()),
    };
    info!("Device {} ({})", device, hostname);

    let record = match provisioning::load() {
        Ok(record) if provisioning::is_complete(&record) => record,
        Ok(_) => restart_after(AppError::Provisioning(bounded_message(
            "set WIFI_SSID and RESPIRA_OWNER at build time",
        ))),
        Err(e) => restart_after(e.into()),
    };

    let node_config = NodeConfig::default();
    let topics: &'static TopicSet =
        match TopicSet::new(node_config.main_topic, record.owner, device) {
            Ok(topics) => TOPICS.init(topics),
            Err(e) => restart_after(e.into()),
        };

    // --- Wi-Fi bring-up ----------------------------------------------------------------------
    info!("Run state: {}", AppRunState::NetworkJoining.as_str());

    let radio_init = match esp_radio::init() {
        Ok(radio_init) => radio_init,
        Err(e) => restart_after(AppError::Wifi(bounded_message(&alloc::format!("{:?}", e)))),
    };
    let radio_init: &'static _ = alloc::boxed::Box::leak(alloc::boxed::Box::new(radio_init));

    let (mut wifi, interfaces) =
        match esp_radio::wifi::new(radio_init, peripherals.WIFI, Default::default()) {
            Ok(v) => v,
            Err(e) => restart_after(AppError::Wifi(bounded_message(&alloc::format!("{:?}", e)))),
        };

    let (stack, runner) = network::create_stack(interfaces.sta, &hostname);
    spawner.spawn(network::net_runner(runner)).ok();

    if let Err(e) = network::join_with_timeout(&mut wifi, stack, &record.internet).await {
        restart_after(AppError::Wifi(bounded_message(&alloc::format!("{}", e))));
    }
    spawner.spawn(network::wifi_keeper(wifi)).ok();

    // --- Sensors and node --------------------------------------------------------------------
    let i2c = match I2c::new(
        peripherals.I2C0,
        I2cConfig::default().with_frequency(Rate::from_khz(100)),
    ) {
        Ok(i2c) => i2c
            .with_sda(peripherals.GPIO8)
            .with_scl(peripherals.GPIO9)
            .into_async(),
        Err(e) => {
            error!("I2C configuration rejected: {:?}", e);
            restart_after(AppError::Sensor(SensorError::ReadFailed {
                sensor: "SHT40",
                operation: "configure I2C",
                details: "invalid bus configuration",
            }))
        }
    };

    let io = NodeIo {
        pulses: PwmPulseReader::new(pwm_input),
        climate: Sht40Climate::new(i2c),
        transport: MqttLink::new(stack),
        device: EspDevice,
        indicator,
    };
    let identity = NodeIdentity {
        device,
        owner: record.owner,
        topics,
    };

    let mut node = match Node::new(node_config, identity, io) {
        Ok(node) => node,
        Err(e) => restart_after(e.into()),
    };

    if !node.start(Instant::now()).await {
        warn!("Broker not reachable at boot, the scheduler keeps retrying");
    }

    loop {
        node.tick(Instant::now()).await;
        Timer::after(TICK_PERIOD).await;
    }
}
