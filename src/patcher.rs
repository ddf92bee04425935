//! Rewrites a guest's domain definition so it resolves on the destination
//! host: graphics and serial console listen addresses, plus per-volume disk
//! definitions taken from the destination's storage connector.
//!
//! The patch steps never mutate their input; each works on a clone and
//! reports what it did (or skipped) as [`PatchEvent`]s for the caller to log.

use crate::context::MigrationContext;
use crate::descriptor::{DeviceDescriptorTree, Element};
use crate::error::HypervisorError;
use crate::provider::DestinationDiskProvider;
use crate::{Result, log_debug, log_info, log_warn};
use std::collections::HashMap;

const GRAPHICS_TYPES: [&str; 2] = ["vnc", "spice"];
const CONSOLE_DEVICES: [&str; 2] = ["serial", "console"];

#[derive(Debug, Clone, PartialEq)]
pub enum PatchEvent {
    GraphicsUpdated {
        graphics_type: String,
        address: String,
    },
    /// A vnc/spice device exists but no address was supplied for it.
    GraphicsSkipped {
        graphics_type: String,
    },
    SerialUpdated {
        device: String,
        host: String,
    },
    SerialSkipped {
        device: String,
    },
    VolumeUpdated {
        position: usize,
        serial: String,
    },
    VolumeSkipped {
        position: usize,
        serial: Option<String>,
        reason: VolumeSkipReason,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum VolumeSkipReason {
    NoSerial,
    NoBlockDeviceMapping,
    NoConnectionInfo,
    ProviderFailed(HypervisorError),
    SerialMismatch { destination: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchResult {
    pub descriptor: DeviceDescriptorTree,
    pub events: Vec<PatchEvent>,
}

/// Apply the graphics, serial and volume steps in that order.
pub fn patch<P>(
    descriptor: &DeviceDescriptorTree,
    context: &MigrationContext,
    provider: &P,
) -> PatchResult
where
    P: DestinationDiskProvider + ?Sized,
{
    let mut events = Vec::new();

    let graphics = update_graphics(descriptor, context);
    events.extend(graphics.events);
    let serial = update_serial(&graphics.descriptor, context);
    events.extend(serial.events);
    let volumes = update_volumes(&serial.descriptor, context, provider);
    events.extend(volumes.events);

    PatchResult {
        descriptor: volumes.descriptor,
        events,
    }
}

/// Parse `xml`, patch it, log what happened and serialize the result.
pub fn get_updated_guest_xml<P>(xml: &str, context: &MigrationContext, provider: &P) -> Result<String>
where
    P: DestinationDiskProvider + ?Sized,
{
    let descriptor = Element::parse(xml)?;
    let result = patch(&descriptor, context, provider);
    for event in &result.events {
        log_event(event);
    }
    Ok(result.descriptor.to_xml())
}

pub fn log_event(event: &PatchEvent) {
    match event {
        PatchEvent::GraphicsUpdated {
            graphics_type,
            address,
        } => log_debug!("Graphics {} now listens on {}", graphics_type, address),
        PatchEvent::GraphicsSkipped { graphics_type } => log_warn!(
            "No {} listen address for destination, leaving graphics device unchanged",
            graphics_type
        ),
        PatchEvent::SerialUpdated { device, host } => {
            log_debug!("TCP {} source host set to {}", device, host)
        }
        PatchEvent::SerialSkipped { device } => log_warn!(
            "No serial listen address for destination, leaving TCP {} unchanged",
            device
        ),
        PatchEvent::VolumeUpdated { position, serial } => {
            log_info!("Find same serial number: pos={}, serial={}", position, serial)
        }
        PatchEvent::VolumeSkipped {
            position,
            serial,
            reason: VolumeSkipReason::ProviderFailed(err),
        } => log_warn!(
            "Unable to get destination disk for pos={} serial={:?}: {}",
            position,
            serial,
            err
        ),
        PatchEvent::VolumeSkipped {
            position,
            serial,
            reason,
        } => log_debug!(
            "Leaving disk pos={} serial={:?} unchanged: {:?}",
            position,
            serial,
            reason
        ),
    }
}

pub fn update_graphics(descriptor: &DeviceDescriptorTree, context: &MigrationContext) -> PatchResult {
    let mut patched = descriptor.clone();
    let mut events = Vec::new();
    let addrs = context.graphics_listen_addrs();

    if let Some(devices) = patched.child_mut("devices") {
        for graphics in devices.children_named_mut("graphics") {
            let graphics_type = match graphics.attr("type") {
                Some(t) if GRAPHICS_TYPES.contains(&t) => t.to_string(),
                _ => continue,
            };
            let Some(address) = addrs.and_then(|a| a.for_type(&graphics_type)) else {
                events.push(PatchEvent::GraphicsSkipped { graphics_type });
                continue;
            };
            let address = address.to_string();

            let mut rewritten = false;
            if let Some(listen) = graphics.child_mut("listen") {
                listen.set_attr("address", address.as_str());
                rewritten = true;
            }
            if graphics.has_attr("listen") {
                graphics.set_attr("listen", address.as_str());
                rewritten = true;
            }
            if !rewritten {
                continue;
            }
            events.push(PatchEvent::GraphicsUpdated {
                graphics_type,
                address,
            });
        }
    }

    PatchResult {
        descriptor: patched,
        events,
    }
}

pub fn update_serial(descriptor: &DeviceDescriptorTree, context: &MigrationContext) -> PatchResult {
    let mut patched = descriptor.clone();
    let mut events = Vec::new();
    let listen_addr = context.serial_listen_addr();

    if let Some(devices) = patched.child_mut("devices") {
        for device in devices
            .children
            .iter_mut()
            .filter(|d| CONSOLE_DEVICES.contains(&d.name.as_str()) && d.attr("type") == Some("tcp"))
        {
            let device_name = device.name.clone();
            for source in device.children_named_mut("source") {
                if !source.has_attr("host") {
                    continue;
                }
                match listen_addr {
                    Some(host) => {
                        source.set_attr("host", host);
                        events.push(PatchEvent::SerialUpdated {
                            device: device_name.clone(),
                            host: host.to_string(),
                        });
                    }
                    None => events.push(PatchEvent::SerialSkipped {
                        device: device_name.clone(),
                    }),
                }
            }
        }
    }

    PatchResult {
        descriptor: patched,
        events,
    }
}

pub fn update_volumes<P>(
    descriptor: &DeviceDescriptorTree,
    context: &MigrationContext,
    provider: &P,
) -> PatchResult
where
    P: DestinationDiskProvider + ?Sized,
{
    let mut patched = descriptor.clone();
    let mut events = Vec::new();

    if let Some(devices) = patched.child_mut("devices") {
        for (position, disk) in devices.children_named_mut("disk").enumerate() {
            match destination_for_disk(disk, context, provider) {
                Ok(destination) => {
                    let serial = disk.child_text("serial").unwrap_or_default().to_string();
                    merge_disk(disk, destination);
                    events.push(PatchEvent::VolumeUpdated { position, serial });
                }
                Err(reason) => events.push(PatchEvent::VolumeSkipped {
                    position,
                    serial: disk.child_text("serial").map(str::to_string),
                    reason,
                }),
            }
        }
    }

    PatchResult {
        descriptor: patched,
        events,
    }
}

fn destination_for_disk<P>(
    disk: &Element,
    context: &MigrationContext,
    provider: &P,
) -> std::result::Result<Element, VolumeSkipReason>
where
    P: DestinationDiskProvider + ?Sized,
{
    let serial = disk.child_text("serial").ok_or(VolumeSkipReason::NoSerial)?;
    let bdm = context
        .block_device(serial)
        .ok_or(VolumeSkipReason::NoBlockDeviceMapping)?;
    let connection_info = bdm
        .connection_info
        .as_ref()
        .ok_or(VolumeSkipReason::NoConnectionInfo)?;

    let destination = provider
        .destination_disk_descriptor(connection_info, &bdm.as_disk_info())
        .map_err(VolumeSkipReason::ProviderFailed)?;

    // A provider answer for some other volume must not be spliced in.
    match destination.child_text("serial") {
        Some(dest_serial) if dest_serial == serial => Ok(destination),
        other => Err(VolumeSkipReason::SerialMismatch {
            destination: other.map(str::to_string),
        }),
    }
}

/// Replace each source child with the destination child of the same tag
/// (k-th with k-th), then append destination children nothing claimed.
fn merge_disk(disk: &mut Element, destination: Element) {
    let mut by_tag: HashMap<String, Vec<Option<Element>>> = HashMap::new();
    let mut order: Vec<(String, usize)> = Vec::new();
    for child in destination.children {
        let slots = by_tag.entry(child.name.clone()).or_default();
        order.push((child.name.clone(), slots.len()));
        slots.push(Some(child));
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    for child in disk.children.iter_mut() {
        let index = seen.entry(child.name.clone()).or_insert(0);
        let replacement = by_tag
            .get_mut(&child.name)
            .and_then(|slots| slots.get_mut(*index))
            .and_then(Option::take);
        *index += 1;
        if let Some(replacement) = replacement {
            *child = replacement;
        }
    }

    for (tag, index) in order {
        if let Some(remaining) = by_tag.get_mut(&tag).and_then(|slots| slots[index].take()) {
            disk.children.push(remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BlockDeviceMapping, ConnectionInfo, DiskInfo};
    use serde_json::json;
    use std::cell::Cell;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn no_provider(_: &ConnectionInfo, _: &DiskInfo) -> std::result::Result<Element, HypervisorError> {
        Err(HypervisorError::Other("provider should not be called".into()))
    }

    fn graphics_domain() -> Element {
        Element::parse(
            "<domain><devices>\
               <graphics type='vnc' listen='127.0.0.1'><listen type='address' address='127.0.0.1'/></graphics>\
               <graphics type='spice' autoport='yes'><listen type='address' address='127.0.0.1'/></graphics>\
               <graphics type='sdl' display=':0'/>\
             </devices></domain>",
        )
        .unwrap()
    }

    fn disk_domain(serial: &str) -> Element {
        Element::parse(&format!(
            "<domain><devices><disk type='block' device='disk'>\
               <driver name='raw'/>\
               <source dev='/dev/sdb'/>\
               <target dev='vdb' bus='virtio'/>\
               <serial>{}</serial>\
             </disk></devices></domain>",
            serial
        ))
        .unwrap()
    }

    fn context_with_volume(serial: &str) -> MigrationContext {
        MigrationContext::new(vec![BlockDeviceMapping::new(serial, "vdb").with_connection_info(
            ConnectionInfo {
                driver_volume_type: "iscsi".into(),
                data: json!({ "volume_id": serial }),
            },
        )])
        .unwrap()
    }

    #[test]
    fn graphics_listen_addresses_follow_context() {
        let context = MigrationContext::default()
            .with_vnc_listen(ip(2))
            .with_spice_listen(ip(3));
        let input = graphics_domain();
        let result = update_graphics(&input, &context);

        let devices = result.descriptor.child("devices").unwrap();
        let graphics: Vec<&Element> = devices.children_named("graphics").collect();
        assert_eq!(graphics[0].attr("listen"), Some("10.0.0.2"));
        assert_eq!(graphics[0].child("listen").unwrap().attr("address"), Some("10.0.0.2"));
        assert!(!graphics[1].has_attr("listen"));
        assert_eq!(graphics[1].child("listen").unwrap().attr("address"), Some("10.0.0.3"));
        assert_eq!(graphics[2], &input.child("devices").unwrap().children[2]);

        // input left untouched
        assert_eq!(input, graphics_domain());
    }

    #[test]
    fn graphics_without_listen_reports_nothing() {
        let context = MigrationContext::default().with_vnc_listen(ip(2));
        let input =
            Element::parse("<domain><devices><graphics type='vnc' port='-1'/></devices></domain>")
                .unwrap();
        let result = update_graphics(&input, &context);

        assert_eq!(result.descriptor, input);
        assert!(result.events.is_empty());

        let result = update_graphics(&graphics_domain(), &context);
        assert!(result.events.contains(&PatchEvent::GraphicsUpdated {
            graphics_type: "vnc".to_string(),
            address: "10.0.0.2".to_string(),
        }));
    }

    #[test]
    fn graphics_patch_is_idempotent() {
        let context = MigrationContext::default()
            .with_vnc_listen(ip(2))
            .with_spice_listen(ip(3));
        let once = update_graphics(&graphics_domain(), &context).descriptor;
        let twice = update_graphics(&once, &context).descriptor;
        assert_eq!(once, twice);
    }

    #[test]
    fn graphics_without_address_is_skipped() {
        let context = MigrationContext::default().with_vnc_listen(ip(2));
        let result = update_graphics(&graphics_domain(), &context);

        let spice = &result.descriptor.child("devices").unwrap().children[1];
        assert_eq!(spice.child("listen").unwrap().attr("address"), Some("127.0.0.1"));
        assert!(result.events.contains(&PatchEvent::GraphicsSkipped {
            graphics_type: "spice".into()
        }));
    }

    #[test]
    fn tcp_console_hosts_are_rewritten() {
        let domain = Element::parse(
            "<domain><devices>\
               <serial type='tcp'><source mode='bind' host='127.0.0.1' service='10000'/></serial>\
               <console type='tcp'><source mode='bind' host='127.0.0.1' service='10001'/></console>\
               <serial type='pty'><source path='/dev/pts/3'/></serial>\
               <console type='tcp'><source mode='bind' service='10002'/></console>\
             </devices></domain>",
        )
        .unwrap();
        let context = MigrationContext::default().with_serial_listen("10.0.0.4");
        let result = update_serial(&domain, &context);

        let devices = &result.descriptor.child("devices").unwrap().children;
        assert_eq!(devices[0].child("source").unwrap().attr("host"), Some("10.0.0.4"));
        assert_eq!(devices[1].child("source").unwrap().attr("host"), Some("10.0.0.4"));
        assert_eq!(devices[2], domain.child("devices").unwrap().children[2]);
        assert!(!devices[3].child("source").unwrap().has_attr("host"));
        assert_eq!(result.events.len(), 2);
    }

    #[test]
    fn serial_without_address_is_left_alone() {
        let domain = Element::parse(
            "<domain><devices><serial type='tcp'><source host='127.0.0.1'/></serial></devices></domain>",
        )
        .unwrap();
        let result = update_serial(&domain, &MigrationContext::default());
        assert_eq!(result.descriptor, domain);
        assert_eq!(
            result.events,
            vec![PatchEvent::SerialSkipped {
                device: "serial".into()
            }]
        );
    }

    #[test]
    fn volume_takes_destination_driver_and_keeps_other_children() {
        let domain = disk_domain("S1");
        let context = context_with_volume("S1");
        let provider = |_: &ConnectionInfo, _: &DiskInfo| {
            Element::parse("<disk type='block'><driver name='qemu'/><serial>S1</serial></disk>")
                .map_err(HypervisorError::from)
        };

        let result = update_volumes(&domain, &context, &provider);
        let disk = result.descriptor.child("devices").unwrap().child("disk").unwrap();
        let source_disk = domain.child("devices").unwrap().child("disk").unwrap();

        assert_eq!(disk.children.len(), 4);
        assert_eq!(disk.children[0], Element::new("driver").with_attr("name", "qemu"));
        assert_eq!(disk.children[1..], source_disk.children[1..]);
        assert_eq!(
            result.events,
            vec![PatchEvent::VolumeUpdated {
                position: 0,
                serial: "S1".into()
            }]
        );
    }

    #[test]
    fn destination_only_children_are_appended() {
        let domain = disk_domain("S1");
        let context = context_with_volume("S1");
        let provider = |_: &ConnectionInfo, _: &DiskInfo| {
            Element::parse(
                "<disk><driver name='qemu' cache='none'/><iotune><total_bytes_sec>1000</total_bytes_sec></iotune>\
                 <source dev='/dev/sdc'/><serial>S1</serial><address type='pci' slot='0x05'/></disk>",
            )
            .map_err(HypervisorError::from)
        };

        let once = update_volumes(&domain, &context, &provider).descriptor;
        let disk = once.child("devices").unwrap().child("disk").unwrap();
        let names: Vec<&str> = disk.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["driver", "source", "target", "serial", "iotune", "address"]);
        assert_eq!(disk.child("source").unwrap().attr("dev"), Some("/dev/sdc"));

        let twice = update_volumes(&once, &context, &provider).descriptor;
        assert_eq!(once, twice);
    }

    #[test]
    fn unknown_serial_makes_no_provider_call() {
        let domain = disk_domain("S2");
        let context = context_with_volume("S1");
        let calls = Cell::new(0);
        let provider = |_: &ConnectionInfo, _: &DiskInfo| {
            calls.set(calls.get() + 1);
            Err::<Element, _>(HypervisorError::Other("unexpected call".into()))
        };

        let result = update_volumes(&domain, &context, &provider);
        assert_eq!(result.descriptor, domain);
        assert_eq!(calls.get(), 0);
        assert!(matches!(
            result.events[0],
            PatchEvent::VolumeSkipped {
                reason: VolumeSkipReason::NoBlockDeviceMapping,
                ..
            }
        ));
    }

    #[test]
    fn mapping_without_connection_info_is_skipped() {
        let domain = disk_domain("S1");
        let context = MigrationContext::new(vec![BlockDeviceMapping::new("S1", "vdb")]).unwrap();
        let result = update_volumes(&domain, &context, &no_provider);
        assert_eq!(result.descriptor, domain);
        assert!(matches!(
            result.events[0],
            PatchEvent::VolumeSkipped {
                reason: VolumeSkipReason::NoConnectionInfo,
                ..
            }
        ));
    }

    #[test]
    fn stale_provider_answer_is_ignored() {
        let domain = disk_domain("S1");
        let context = context_with_volume("S1");
        let provider = |_: &ConnectionInfo, _: &DiskInfo| {
            Element::parse("<disk><driver name='qemu'/><serial>S9</serial></disk>")
                .map_err(HypervisorError::from)
        };
        let result = update_volumes(&domain, &context, &provider);
        assert_eq!(result.descriptor, domain);
        assert_eq!(
            result.events[0],
            PatchEvent::VolumeSkipped {
                position: 0,
                serial: Some("S1".into()),
                reason: VolumeSkipReason::SerialMismatch {
                    destination: Some("S9".into())
                },
            }
        );
    }

    #[test]
    fn provider_failure_skips_only_that_disk() {
        let domain = disk_domain("S1");
        let context = context_with_volume("S1");
        let result = update_volumes(&domain, &context, &no_provider);
        assert_eq!(result.descriptor, domain);
        assert!(matches!(
            &result.events[0],
            PatchEvent::VolumeSkipped {
                reason: VolumeSkipReason::ProviderFailed(_),
                ..
            }
        ));
    }
}
