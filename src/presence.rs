//! Idempotent upserts over pod spec collections
//!
//! Every injector mutation goes through this module: a resource is only
//! appended after a presence check keyed by name, which is what makes
//! repeated admission of an already-mutated pod a no-op instead of a
//! duplicate-accumulation bug. Centralizing the checks here also keeps the
//! no-duplicate invariant (volumes, containers, mounts, env vars) in one
//! place instead of scattered linear scans.

use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, Volume, VolumeMount};
use tracing::debug;

/// Anything in a pod spec collection that is keyed by a unique name
pub trait Named {
    /// The unique name within the owning collection
    fn name(&self) -> &str;
}

impl Named for Volume {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Container {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for EnvVar {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for VolumeMount {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Whether an item with this name is present in the collection
pub fn has_named<T: Named>(list: &[T], name: &str) -> bool {
    list.iter().any(|item| item.name() == name)
}

/// Append the item unless one with the same name is already present
///
/// Returns true if the collection changed.
pub fn upsert_named<T: Named>(list: &mut Vec<T>, item: T) -> bool {
    if has_named(list, item.name()) {
        return false;
    }
    list.push(item);
    true
}

/// Whether the pod spec has a volume with this name
pub fn has_volume(spec: &PodSpec, name: &str) -> bool {
    spec.volumes
        .as_deref()
        .is_some_and(|volumes| has_named(volumes, name))
}

/// Ensure a volume is present on the pod spec
pub fn ensure_volume(spec: &mut PodSpec, volume: Volume) -> bool {
    let name = volume.name.clone();
    let added = upsert_named(spec.volumes.get_or_insert_with(Vec::new), volume);
    if added {
        debug!(volume = %name, "added volume");
    }
    added
}

/// Ensure an environment variable is present on the container
pub fn ensure_env_var(container: &mut Container, env: EnvVar) -> bool {
    upsert_named(container.env.get_or_insert_with(Vec::new), env)
}

/// Ensure a sidecar container is present in the container list
pub fn ensure_sidecar(containers: &mut Vec<Container>, container: Container) -> bool {
    upsert_named(containers, container)
}

/// Ensure an init container is present, inserting it at index 0
///
/// Init containers run in order, so a container that must complete before
/// the workload's own init containers is inserted at the front rather than
/// appended. Returns true if the list changed.
pub fn prepend_init_container(spec: &mut PodSpec, container: Container) -> bool {
    let init_containers = spec.init_containers.get_or_insert_with(Vec::new);
    if has_named(init_containers, &container.name) {
        return false;
    }
    init_containers.insert(0, container);
    true
}

/// Ensure a volume mount is present on the container
///
/// A mount matching by name and path but with a different read-only flag is
/// corrected in place rather than appended again, so the no-duplicate-mount
/// invariant holds even against pods that pre-declare the mount themselves.
/// Returns true if the container changed.
pub fn ensure_volume_mount(container: &mut Container, target: VolumeMount) -> bool {
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);

    let existing = mounts
        .iter()
        .position(|vm| vm.name == target.name && vm.mount_path == target.mount_path);

    match existing {
        Some(index) => {
            if mounts[index].read_only.unwrap_or(false) != target.read_only.unwrap_or(false) {
                debug!(
                    container = %container.name,
                    mount = %target.name,
                    read_only = ?target.read_only,
                    "correcting read-only flag on existing volume mount"
                );
                mounts[index].read_only = target.read_only;
                return true;
            }
            false
        }
        None => {
            mounts.push(target);
            true
        }
    }
}
