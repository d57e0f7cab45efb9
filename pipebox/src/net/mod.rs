//! Port publishing: translation of declarative publish specs into the port
//! bindings and exposed-port sets the engine understands.

mod ports;

pub use ports::{
    ExposedPortMap, PortBinding, PortBindingMap, PublishSpec, exposed_port_maps, exposed_ports,
    port_bindings,
};
