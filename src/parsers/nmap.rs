//! Nmap/Masscan XML input: hosts reported up, one `host:port` entry per open
//! TCP port.

use std::io::BufRead;

use anyhow::{Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Default)]
struct HostEntry {
    up: bool,
    address: Option<String>,
    hostname: Option<String>,
    open_ports: Vec<u16>,
}

fn attribute(tag: &BytesStart<'_>, name: &str) -> Option<String> {
    tag.attributes().flatten().find_map(|attr| {
        if attr.key.as_ref() == name.as_bytes() {
            String::from_utf8(attr.value.to_vec()).ok()
        } else {
            None
        }
    })
}

pub fn parse<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut xml = Reader::from_reader(reader);
    xml.config_mut().trim_text(true);

    let mut targets = Vec::new();
    let mut buf = Vec::new();
    let mut host: Option<HostEntry> = None;
    let mut in_port = false;
    let mut current_port: Option<u16> = None;

    loop {
        let event = xml
            .read_event_into(&mut buf)
            .context("unable to parse input as Nmap/Masscan XML")?;
        match event {
            Event::Start(ref tag) | Event::Empty(ref tag) => {
                let is_empty = matches!(event, Event::Empty(_));
                match tag.name().as_ref() {
                    b"host" => {
                        host = Some(HostEntry::default());
                        if is_empty {
                            host = None;
                        }
                    }
                    b"status" => {
                        if let Some(entry) = host.as_mut() {
                            if attribute(tag, "state").as_deref() == Some("up") {
                                entry.up = true;
                            }
                        }
                    }
                    b"address" => {
                        if let Some(entry) = host.as_mut() {
                            if entry.address.is_none() {
                                entry.address = attribute(tag, "addr");
                            }
                        }
                    }
                    b"hostname" => {
                        if let Some(entry) = host.as_mut() {
                            if entry.hostname.is_none() {
                                entry.hostname = attribute(tag, "name");
                            }
                        }
                    }
                    b"port" => {
                        let tcp = attribute(tag, "protocol").as_deref() == Some("tcp");
                        current_port = if tcp {
                            attribute(tag, "portid").and_then(|p| p.parse().ok())
                        } else {
                            None
                        };
                        in_port = !is_empty;
                    }
                    b"state" if in_port => {
                        if attribute(tag, "state").as_deref() == Some("open") {
                            if let (Some(entry), Some(port)) = (host.as_mut(), current_port) {
                                entry.open_ports.push(port);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::End(ref tag) => match tag.name().as_ref() {
                b"port" => {
                    in_port = false;
                    current_port = None;
                }
                b"host" => {
                    if let Some(entry) = host.take() {
                        if entry.up {
                            if let Some(name) = entry.hostname.or(entry.address) {
                                for port in entry.open_ports {
                                    targets.push(format!("{}:{}", name, port));
                                }
                            }
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(targets)
}
