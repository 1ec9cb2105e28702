//! Provisioning values are taken from the environment (or a `.env` file next to
//! this crate) at build time and compiled into the firmware.

const PROVISIONING_KEYS: [&str; 3] = ["WIFI_SSID", "WIFI_PASSWORD", "RESPIRA_OWNER"];

fn main() {
    if let Ok(path) = dotenvy::dotenv() {
        println!("cargo:rerun-if-changed={}", path.display());
    }

    for key in PROVISIONING_KEYS {
        println!("cargo:rerun-if-env-changed={key}");
        if let Ok(value) = std::env::var(key) {
            println!("cargo:rustc-env={key}={value}");
        }
    }

    println!("cargo:rustc-link-arg=-Tlinkall.x");
}
