use libcontainer::container::Container as LibContainer;
use libcontainer::signal::Signal;

const SIGKILL: i32 = 9;

/// SIGKILL every process of the container, if any is alive.
pub(super) fn kill_container(container: &mut LibContainer) {
    if !container.can_kill() {
        return;
    }

    let sigkill = match Signal::try_from(SIGKILL) {
        Ok(signal) => signal,
        Err(e) => {
            tracing::warn!(container_id = %container.id(), "Invalid SIGKILL: {}", e);
            return;
        }
    };

    if let Err(e) = container.kill(sigkill, true) {
        tracing::debug!(container_id = %container.id(), "Kill failed: {}", e);
    }
}

/// Remove the container's state; forced unless it is already stopped.
pub(super) fn delete_container(container: &mut LibContainer) -> Result<(), String> {
    let force = !container.can_delete();
    container.delete(force).map_err(|e| e.to_string())
}
