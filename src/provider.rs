use crate::context::{ConnectionInfo, DiskInfo};
use crate::descriptor::Element;
use crate::error::HypervisorError;
use crate::{NovaError, log_debug};
use std::fs;
use std::path::{Path, PathBuf};

/// Produces the `<disk>` definition a volume will have once attached on
/// the destination host.
pub trait DestinationDiskProvider {
    fn destination_disk_descriptor(
        &self,
        connection_info: &ConnectionInfo,
        disk_info: &DiskInfo,
    ) -> Result<Element, HypervisorError>;
}

impl<F> DestinationDiskProvider for F
where
    F: Fn(&ConnectionInfo, &DiskInfo) -> Result<Element, HypervisorError>,
{
    fn destination_disk_descriptor(
        &self,
        connection_info: &ConnectionInfo,
        disk_info: &DiskInfo,
    ) -> Result<Element, HypervisorError> {
        self(connection_info, disk_info)
    }
}

/// Reads pre-rendered destination disk definitions from `<dir>/<volume_id>.xml`.
pub struct DirectoryDiskProvider {
    dir: PathBuf,
}

impl DirectoryDiskProvider {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn fragment_path(&self, connection_info: &ConnectionInfo) -> crate::Result<PathBuf> {
        let volume_id = connection_info.volume_id().ok_or_else(|| {
            NovaError::ConfigError("connection info has no volume_id".to_string())
        })?;
        if volume_id.is_empty() || volume_id.contains(['/', '\\']) || volume_id == ".." {
            return Err(NovaError::ConfigError(format!(
                "volume_id '{}' is not a plain file name",
                volume_id
            )));
        }
        let path = self.dir.join(format!("{}.xml", volume_id));
        if !path.exists() {
            return Err(NovaError::DiskFragmentNotFound(volume_id.to_string()));
        }
        Ok(path)
    }
}

impl DestinationDiskProvider for DirectoryDiskProvider {
    fn destination_disk_descriptor(
        &self,
        connection_info: &ConnectionInfo,
        disk_info: &DiskInfo,
    ) -> Result<Element, HypervisorError> {
        let path = self.fragment_path(connection_info)?;
        log_debug!(
            "Loading destination disk for {} from {}",
            disk_info.dev,
            path.display()
        );
        let contents = fs::read_to_string(&path).map_err(NovaError::from)?;
        Ok(Element::parse(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn disk_info() -> DiskInfo {
        DiskInfo {
            dev: "vda".into(),
            bus: "virtio".into(),
            device_type: "disk".into(),
            format: None,
            boot_index: Some(0),
        }
    }

    #[test]
    fn reads_fragment_named_after_volume() {
        let tmp = tempdir().expect("temp dir");
        fs::write(
            tmp.path().join("vol-1.xml"),
            "<disk type='block'><serial>vol-1</serial></disk>",
        )
        .unwrap();

        let provider = DirectoryDiskProvider::new(tmp.path());
        let connection_info = ConnectionInfo {
            driver_volume_type: "iscsi".into(),
            data: json!({ "volume_id": "vol-1" }),
        };
        let disk = provider
            .destination_disk_descriptor(&connection_info, &disk_info())
            .unwrap();
        assert_eq!(disk.child_text("serial"), Some("vol-1"));
    }

    #[test]
    fn missing_fragment_is_an_error() {
        let tmp = tempdir().expect("temp dir");
        let provider = DirectoryDiskProvider::new(tmp.path());
        let connection_info = ConnectionInfo {
            driver_volume_type: "rbd".into(),
            data: json!({ "volume_id": "vol-9" }),
        };
        let err = provider
            .destination_disk_descriptor(&connection_info, &disk_info())
            .unwrap_err();
        assert!(err.to_string().contains("vol-9"));
    }

    #[test]
    fn volume_id_cannot_leave_directory() {
        let tmp = tempdir().expect("temp dir");
        let disks = tmp.path().join("disks");
        fs::create_dir(&disks).unwrap();
        fs::write(tmp.path().join("outside.xml"), "<disk type='block'/>").unwrap();

        let provider = DirectoryDiskProvider::new(&disks);
        for volume_id in ["../outside", "a/b", "..\\outside", ""] {
            let connection_info = ConnectionInfo {
                driver_volume_type: "iscsi".into(),
                data: json!({ "volume_id": volume_id }),
            };
            let err = provider
                .destination_disk_descriptor(&connection_info, &disk_info())
                .unwrap_err();
            assert!(err.to_string().contains("not a plain file name"), "{}", err);
        }
    }
}
