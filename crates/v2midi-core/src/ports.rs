//! Port discovery and input/output pairing.
//!
//! Operating systems expose the input and output ports of one physical
//! device as unrelated entries. The pairing here is a heuristic based on
//! port names and their position in the enumeration: two different devices
//! with identical port names can be mis-paired, and nothing here can detect
//! that. Callers should present the result as a best guess.

use std::fmt;

use tracing::debug;

/// Port direction, seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Connected,
    Disconnected,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Connected => write!(f, "connected"),
            PortState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A platform-reported MIDI port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub id: String,
    pub name: String,
    pub direction: Direction,
    pub state: PortState,
}

impl Port {
    pub fn input(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            direction: Direction::Input,
            state: PortState::Connected,
        }
    }

    pub fn output(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            direction: Direction::Output,
            state: PortState::Connected,
        }
    }
}

/// An input port with its (guessed) output port, or an output-only device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Input id followed by output id.
    pub id: String,
    pub name: String,
    pub input: Option<Port>,
    pub output: Option<Port>,
}

impl DeviceDescriptor {
    pub fn is_paired(&self) -> bool {
        self.input.is_some() && self.output.is_some()
    }
}

/// Which devices `assemble_devices` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFilter {
    /// Only inputs that found an output.
    Paired,
    /// Every input, paired or not.
    WithInput,
    /// Every input plus the leftover output-only devices.
    All,
}

// Windows names the ports "MIDIIN2 (Device)" and "MIDIOUT2 (Device)".
fn is_windows_input_name(name: &str) -> bool {
    let mut chars = name.strip_prefix("MIDIIN").unwrap_or("").chars();
    matches!(chars.next(), Some('1'..='9'))
}

fn normalized_output_name<'a>(input_name: &str, output_name: &'a str) -> std::borrow::Cow<'a, str> {
    if is_windows_input_name(input_name) {
        if let Some(rest) = output_name.strip_prefix("MIDIOUT") {
            return format!("MIDIIN{}", rest).into();
        }
    }
    output_name.into()
}

/// Find the output port belonging to `input`.
///
/// The input's ordinal among inputs of the same name selects the output
/// with the same ordinal among outputs of that name. Ties are broken by
/// enumeration order only.
pub fn find_output_port<'a>(input: &Port, inputs: &[Port], outputs: &'a [Port]) -> Option<&'a Port> {
    let same_name = inputs.iter().filter(|p| p.name == input.name);
    // An input missing from the list counts after all of its namesakes.
    let input_idx = same_name
        .clone()
        .position(|p| p.id == input.id)
        .unwrap_or_else(|| same_name.count());

    outputs
        .iter()
        .filter(|p| normalized_output_name(&input.name, &p.name) == input.name.as_str())
        .nth(input_idx)
}

/// Combine input and output ports to devices. Each output is used at most once.
pub fn assemble_devices(inputs: &[Port], outputs: &[Port], filter: DeviceFilter) -> Vec<DeviceDescriptor> {
    let mut devices = Vec::new();
    let mut remaining: Vec<&Port> = outputs.iter().collect();

    for input in inputs {
        let output = find_output_port(input, inputs, outputs);

        match output {
            Some(output) => remaining.retain(|p| p.id != output.id),
            None if filter == DeviceFilter::Paired => continue,
            None => {}
        }

        let id = format!("{}{}", input.id, output.map(|o| o.id.as_str()).unwrap_or(""));
        debug!(id = %id, name = %input.name, paired = output.is_some(), "Assembled device");
        devices.push(DeviceDescriptor {
            id,
            name: input.name.clone(),
            input: Some(input.clone()),
            output: output.cloned(),
        });
    }

    if filter != DeviceFilter::All {
        return devices;
    }

    for output in remaining {
        devices.push(DeviceDescriptor {
            id: output.id.clone(),
            name: output.name.clone(),
            input: None,
            output: Some(output.clone()),
        });
    }

    devices
}

/// Find a device by name for auto-connect. The platforms append a port
/// suffix to the device name: " Port 1" on macOS, " MIDI 1" on Linux.
pub fn find_by_name<'a>(devices: &'a [DeviceDescriptor], name: &str) -> Option<&'a DeviceDescriptor> {
    for device in devices {
        for suffix in ["", " Port 1", " MIDI 1"] {
            if device.name == format!("{}{}", name, suffix) {
                return Some(device);
            }
        }
    }
    None
}

/// Explicit registry of the ports currently known to the platform.
///
/// Platforms which only support enumeration feed every listing through
/// `update`; the returned changes stand in for hotplug notifications.
#[derive(Debug, Default, Clone)]
pub struct PortRegistry {
    inputs: Vec<Port>,
    outputs: Vec<Port>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    pub fn find(&self, id: &str, direction: Direction) -> Option<&Port> {
        let ports = match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        };
        ports.iter().find(|p| p.id == id)
    }

    /// Replace the known ports with a fresh listing and return what changed.
    pub fn update(&mut self, ports: Vec<Port>) -> Vec<Port> {
        let (inputs, outputs): (Vec<Port>, Vec<Port>) = ports
            .into_iter()
            .filter(|p| p.state == PortState::Connected)
            .partition(|p| p.direction == Direction::Input);

        let mut changes = Vec::new();
        for (old, new) in [(&self.inputs, &inputs), (&self.outputs, &outputs)] {
            for port in old.iter().filter(|p| !new.iter().any(|n| n.id == p.id)) {
                changes.push(Port {
                    state: PortState::Disconnected,
                    ..port.clone()
                });
            }
            for port in new.iter().filter(|p| !old.iter().any(|o| o.id == p.id)) {
                changes.push(port.clone());
            }
        }

        self.inputs = inputs;
        self.outputs = outputs;
        changes
    }

    pub fn devices(&self, filter: DeviceFilter) -> Vec<DeviceDescriptor> {
        assemble_devices(&self.inputs, &self.outputs, filter)
    }
}
