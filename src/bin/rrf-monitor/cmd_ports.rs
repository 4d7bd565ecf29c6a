use anyhow::Result;
use rrf_monitor::port;

pub fn run(json: bool) -> Result<()> {
    let ports = port::list_all()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        let description = [port.manufacturer, port.product, port.serial_number]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        println!("{}\t{}\t{}", port.port, port.kind, description);
    }
    Ok(())
}
