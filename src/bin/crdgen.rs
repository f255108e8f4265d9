//! # CRD Generator
//!
//! Prints the `ScheduledScan` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/scheduledscan.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use cloud_scan_discovery::crd::ScheduledScan;
use kube::core::CustomResourceExt;

fn main() {
    let crd = ScheduledScan::crd();

    match serde_yaml::to_string(&crd) {
        Ok(yaml) => {
            print!("{yaml}");
        }
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
