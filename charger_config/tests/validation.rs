use charger_config::{Config, load_toml};

#[test]
fn empty_config_uses_defaults_and_validates() {
    let cfg = load_toml("").unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.link.baud, 9600);
    assert_eq!(cfg.web.bind, "0.0.0.0:8080");
    assert_eq!(cfg.sensors.panel_addr, 0x40);
}

#[test]
fn full_config_parses() {
    let cfg = load_toml(
        r#"
[link]
device = "/dev/ttyUSB0"
baud = 9600

[web]
enabled = false
bind = "127.0.0.1:9000"

[sensors]
i2c_bus = 1
panel_addr = 0x44
battery_addr = 0x45
ntc_adc_channel = 2

[store]
path = "/var/lib/charger/store.toml"

[logging]
file = "logs/charger.log"
level = "debug"
rotation = "daily"
"#,
    )
    .unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.link.device, "/dev/ttyUSB0");
    assert_eq!(cfg.sensors.panel_addr, 0x44);
    assert_eq!(cfg.logging.rotation.as_deref(), Some("daily"));
}

#[test]
fn zero_baud_rejected() {
    let cfg = load_toml("[link]\nbaud = 0\n").unwrap();
    assert!(cfg.validate().unwrap_err().contains("baud"));
}

#[test]
fn bad_bind_rejected_only_when_web_enabled() {
    let cfg = load_toml("[web]\nenabled = true\nbind = \"not-an-addr\"\n").unwrap();
    assert!(cfg.validate().is_err());

    let cfg = load_toml("[web]\nenabled = false\nbind = \"not-an-addr\"\n").unwrap();
    cfg.validate().unwrap();
}

#[test]
fn shared_sensor_address_rejected() {
    let cfg = load_toml("[sensors]\npanel_addr = 0x40\nbattery_addr = 0x40\n").unwrap();
    assert!(cfg.validate().is_err());
}

#[test]
fn out_of_range_address_rejected() {
    let cfg: Config = load_toml("[sensors]\npanel_addr = 0x02\n").unwrap();
    assert!(cfg.validate().is_err());
}

#[test]
fn unparseable_toml_is_an_error() {
    assert!(load_toml("[link\nbaud = ").is_err());
}
