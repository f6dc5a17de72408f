//! Focus-session lifecycle against the simulated camera: frames are
//! withheld from the external reducer while a session is active.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use vayu_mon::config::CameraConfig;
use vayu_mon::devices::CloudCamera;
use vayu_mon::transport::UdpLink;
use vayu_mon::types::Site;

fn test_config(raw_dir: &std::path::Path) -> CameraConfig {
    CameraConfig {
        driver: "sim".to_string(),
        raw_image_dir: raw_dir.to_string_lossy().into_owned(),
        prefix: "WMC".to_string(),
        cloudage_file: "cloudage.txt".to_string(),
        sun_alt_max: -10.0,
        expdur_min: 1,
        expdur_max: 30,
        saturation: 50_000,
        cooler_set: -20,
        fwhm_target: 3.0,
        focus_sigma: 0.1,
        cloud_stale_secs: 300,
        min_disk_free_gb: 0,
    }
}

fn test_site() -> Arc<Site> {
    Arc::new(Site {
        name: "IT".to_string(),
        device_id: "WMC-IT".to_string(),
        longitude: 80.0,
        latitude: 32.0,
        altitude: 5100.0,
        timezone: 8,
    })
}

#[test]
fn focus_session_suspends_reducer_announcements() {
    let sample_dir = tempfile::tempdir().unwrap();
    let raw_dir = tempfile::tempdir().unwrap();

    let mut cam = CloudCamera::start(
        test_config(raw_dir.path()),
        test_site(),
        sample_dir.path().to_path_buf(),
        1,
    )
    .unwrap();

    // normal operation announces frames to observed.list
    std::thread::sleep(Duration::from_millis(1800));
    let observed = sample_dir.path().join("observed.list");
    let before = std::fs::read_to_string(&observed).unwrap();
    assert!(!before.is_empty());

    // a manual focus session diverts frames into the reduce queue
    let endpoint = Arc::new(UdpLink::open(0).unwrap());
    cam.begin_focus(true, Arc::clone(&endpoint));
    std::thread::sleep(Duration::from_millis(2500));
    let during = std::fs::read_to_string(&observed).unwrap();

    cam.end_focus();
    std::thread::sleep(Duration::from_millis(1800));
    let after = std::fs::read_to_string(&observed).unwrap();

    cam.stop();

    // one in-flight frame may still land right after the session opens
    assert!(
        during.lines().count() <= before.lines().count() + 1,
        "frames leaked to the reducer during focus"
    );
    assert!(
        after.lines().count() > during.lines().count(),
        "announcements did not resume after the session"
    );

    // every announced frame exists on disk
    for line in after.lines() {
        let (dir, name) = line.split_once('\t').unwrap();
        assert!(PathBuf::from(dir).join(name).exists());
    }
}
