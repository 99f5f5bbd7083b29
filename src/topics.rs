//! Topic scheme published by the vmod gateway
//!
//! Every path starts with `selfmon/vmod.<vmodid>/` followed by the
//! subsystem: `vkp` (virtual keypad), `vprinter`, `vrio` (virtual remote
//! I/O), `prio` (physical remote I/O) and `sia4` (groups).

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicScheme {
    root: String,
}

impl TopicScheme {
    pub fn new(vmodid: &str) -> Self {
        Self {
            root: format!("selfmon/vmod.{}", vmodid),
        }
    }

    pub fn vkp(&self) -> String {
        format!("{}/vkp", self.root)
    }

    pub fn vprinter(&self) -> String {
        format!("{}/vprinter", self.root)
    }

    /// Virtual zones, write side (switch commands)
    pub fn vrio_inputs_write(&self) -> String {
        format!("{}/vrio/inputs/write", self.root)
    }

    /// Virtual zones, read side (panel state)
    pub fn vrio_inputs_read(&self) -> String {
        format!("{}/vrio/inputs/read", self.root)
    }

    pub fn vrio_outputs(&self) -> String {
        format!("{}/vrio/outputs", self.root)
    }

    pub fn prio_inputs_read(&self) -> String {
        format!("{}/prio/inputs/read", self.root)
    }

    pub fn prio_outputs(&self) -> String {
        format!("{}/prio/outputs", self.root)
    }

    pub fn sia4_groups(&self) -> String {
        format!("{}/sia4/groups", self.root)
    }

    pub fn keypad_key(&self) -> String {
        format!("{}/key", self.vkp())
    }

    pub fn keypad_display(&self, line: u8) -> String {
        format!("{}/display/{}", self.vkp(), line)
    }

    pub fn printer_log(&self) -> String {
        format!("{}/log", self.vprinter())
    }

    pub fn printer_print(&self) -> String {
        format!("{}/print", self.vprinter())
    }
}

/// `<base>/<n>`
pub fn indexed(base: &str, number: u32) -> String {
    format!("{}/{}", base, number)
}

/// `<base>/+`, the discovery pattern for numbered items
pub fn wildcard(base: &str) -> String {
    format!("{}/+", base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_gateway_paths() {
        let topics = TopicScheme::new("1234");
        assert_eq!(topics.prio_inputs_read(), "selfmon/vmod.1234/prio/inputs/read");
        assert_eq!(indexed(&topics.prio_outputs(), 5), "selfmon/vmod.1234/prio/outputs/5");
        assert_eq!(wildcard(&topics.sia4_groups()), "selfmon/vmod.1234/sia4/groups/+");
        assert_eq!(topics.keypad_key(), "selfmon/vmod.1234/vkp/key");
        assert_eq!(topics.keypad_display(2), "selfmon/vmod.1234/vkp/display/2");
        assert_eq!(topics.printer_log(), "selfmon/vmod.1234/vprinter/log");
        assert_eq!(topics.vrio_inputs_write(), "selfmon/vmod.1234/vrio/inputs/write");
    }
}
