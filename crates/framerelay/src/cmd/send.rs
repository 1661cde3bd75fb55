use std::fs;

use framerelay_frame::{Packet, PacketCatalog, PacketConfig, PacketReader, PacketWriter};
use framerelay_transport::TcpSocket;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{frame_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let packet = Packet::new(args.code, packet_name(&args), resolve_payload(&args)?);

    let stream =
        TcpSocket::connect(args.addr).map_err(|err| transport_error("connect failed", err))?;
    let reader_stream = stream
        .try_clone()
        .map_err(|err| transport_error("connect failed", err))?;

    let mut writer = PacketWriter::new(stream);
    writer
        .write_packet(&packet)
        .map_err(|err| frame_error("send failed", err))?;

    if args.wait > 0 {
        let config = PacketConfig {
            read_timeout: Some(wait_timeout),
            ..PacketConfig::default()
        };
        let mut reader = PacketReader::with_config_ipc(reader_stream, config)
            .map_err(|err| frame_error("receive failed", err))?;
        let source = args.addr.to_string();
        for _ in 0..args.wait {
            let response = reader
                .read_packet()
                .map_err(|err| frame_error("receive failed", err))?;
            print_packet(&response, &source, format);
        }
    }

    Ok(SUCCESS)
}

fn packet_name(args: &SendArgs) -> String {
    match &args.name {
        Some(name) => name.clone(),
        None => PacketCatalog::standard()
            .lookup(args.code)
            .unwrap_or_default()
            .to_string(),
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(code: u32, name: Option<&str>) -> SendArgs {
        SendArgs {
            addr: "127.0.0.1:1669".parse().unwrap(),
            code,
            name: name.map(str::to_string),
            data: Some("face".to_string()),
            file: None,
            wait: 0,
            wait_timeout: "5s".to_string(),
        }
    }

    #[test]
    fn name_defaults_to_catalog_entry() {
        assert_eq!(packet_name(&args(1112, None)), "SetOrientation");
        assert_eq!(packet_name(&args(9999, None)), "");
        assert_eq!(packet_name(&args(1112, Some("Custom"))), "Custom");
    }

    #[test]
    fn payload_from_data() {
        assert_eq!(resolve_payload(&args(1111, None)).unwrap(), b"face");
    }

    #[test]
    fn missing_payload_file_is_an_error() {
        let mut args = args(1111, None);
        args.data = None;
        args.file = Some("/nonexistent/framerelay-payload".into());
        assert_eq!(
            resolve_payload(&args).unwrap_err().code,
            crate::exit::FAILURE
        );
    }
}
