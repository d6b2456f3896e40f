use cortex_m::peripheral::SCB;
use dualboot::SystemControl;

/// Restarts through the system control block so the loader runs again.
pub struct ScbRestart;

impl SystemControl for ScbRestart {
    fn restart(&mut self) {
        SCB::sys_reset();
    }
}
