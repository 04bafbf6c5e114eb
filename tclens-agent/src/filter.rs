//! Netlink queries for installed TC filters
//!
//! A classifier counts as active only while its filter is still installed
//! under the clsact qdisc of its interface. Deleting the filter or the whole
//! qdisc (`tc filter del`, `tc qdisc del dev X clsact`) leaves the interface
//! up but the program detached.

use std::io;

use netlink_packet_core::{
    NetlinkBuffer, NetlinkHeader, NetlinkMessage, NetlinkPayload, NLM_F_DUMP, NLM_F_REQUEST,
};
use netlink_packet_route::tc::{TcAttribute, TcHandle, TcMessage, TcOption};
use netlink_packet_route::RouteNetlinkMessage;
use netlink_packet_utils::nla::Nla;
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
use tclens::{TcLensError, TrafficDirection};
use tracing::debug;

use crate::discovery;

const RECV_BUF_SIZE: usize = 64 * 1024;
const TC_H_CLSACT_MAJOR: u16 = 0xffff;
const TC_H_MIN_INGRESS: u16 = 0xfff2;
const TC_H_MIN_EGRESS: u16 = 0xfff3;
const TCA_BPF_ID: u16 = 11;

/// Identity of one attached classifier filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSpec {
    pub ifindex: u32,
    pub direction: TrafficDirection,
    pub priority: u16,
    /// 0 when the kernel picked the handle
    pub handle: u32,
    /// Kernel id of the loaded program, when known
    pub prog_id: Option<u32>,
}

/// What netlink reports for a [`FilterSpec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Installed,
    /// The interface exists but the filter (or its qdisc) is gone
    Missing,
    LinkGone,
}

impl FilterState {
    pub fn is_installed(self) -> bool {
        self == FilterState::Installed
    }
}

/// Liveness as seen by the sweep. A query that could not be made says
/// nothing about the filter, so it keeps the program.
pub fn is_active_or_unknown(state: Result<FilterState, TcLensError>) -> bool {
    match state {
        Ok(state) => state.is_installed(),
        Err(e) => {
            debug!(error = %e, "couldn't query TC filter, keeping it");
            true
        }
    }
}

/// Parent handle of the clsact hook for `direction`
pub fn clsact_parent(direction: TrafficDirection) -> TcHandle {
    let minor = match direction {
        TrafficDirection::Ingress => TC_H_MIN_INGRESS,
        TrafficDirection::Egress => TC_H_MIN_EGRESS,
    };
    TcHandle::from((u32::from(TC_H_CLSACT_MAJOR) << 16) | u32::from(minor))
}

/// Look up `spec` in the calling thread's namespace
pub fn filter_state(spec: &FilterSpec) -> Result<FilterState, TcLensError> {
    if discovery::interface_name(spec.ifindex).is_none() {
        return Ok(FilterState::LinkGone);
    }

    let filters = list_filters(spec.ifindex, clsact_parent(spec.direction))?;
    if filters.iter().any(|msg| filter_matches(msg, spec)) {
        Ok(FilterState::Installed)
    } else {
        Ok(FilterState::Missing)
    }
}

/// Whether a dumped filter message describes `spec`
pub fn filter_matches(msg: &TcMessage, spec: &FilterSpec) -> bool {
    if msg.header.index != spec.ifindex as i32 {
        return false;
    }
    if msg.header.parent != clsact_parent(spec.direction) {
        return false;
    }
    // tcm_info carries the priority in its upper half
    if (msg.header.info >> 16) as u16 != spec.priority {
        return false;
    }
    if spec.handle != 0 && u32::from(msg.header.handle) != spec.handle {
        return false;
    }

    let is_bpf = msg
        .attributes
        .iter()
        .any(|attr| matches!(attr, TcAttribute::Kind(kind) if kind == "bpf"));
    if !is_bpf {
        return false;
    }

    match (spec.prog_id, bpf_prog_id(msg)) {
        (Some(expected), Some(found)) => expected == found,
        _ => true,
    }
}

fn bpf_prog_id(msg: &TcMessage) -> Option<u32> {
    msg.attributes.iter().find_map(|attr| match attr {
        TcAttribute::Options(options) => options.iter().find_map(|option| match option {
            TcOption::Other(nla) if nla.kind() == TCA_BPF_ID && nla.value_len() == 4 => {
                let mut value = [0u8; 4];
                nla.emit_value(&mut value);
                Some(u32::from_ne_bytes(value))
            }
            _ => None,
        }),
        _ => None,
    })
}

/// Dump the filters attached under `parent` on `ifindex`
fn list_filters(ifindex: u32, parent: TcHandle) -> Result<Vec<TcMessage>, TcLensError> {
    let mut socket = Socket::new(NETLINK_ROUTE)?;
    socket.bind_auto()?;
    socket.connect(&SocketAddr::new(0, 0))?;

    let mut request = TcMessage::with_index(ifindex as i32);
    request.header.parent = parent;

    let mut header = NetlinkHeader::default();
    header.flags = NLM_F_REQUEST | NLM_F_DUMP;
    header.sequence_number = 1;
    let mut message = NetlinkMessage::new(
        header,
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::GetTrafficFilter(request)),
    );
    message.finalize();
    let mut buf = vec![0u8; message.buffer_len()];
    message.serialize(&mut buf);
    socket.send(&buf, 0)?;

    let mut filters = Vec::new();
    let mut recv_buf: Vec<u8> = Vec::with_capacity(RECV_BUF_SIZE);
    loop {
        recv_buf.clear();
        let n = socket.recv(&mut recv_buf, 0)?;
        if n == 0 {
            return Ok(filters);
        }

        let mut offset = 0;
        while offset < n {
            let bytes = &recv_buf[offset..n];
            let length = NetlinkBuffer::new_checked(bytes)
                .map_err(|e| netlink_error(e.to_string()))?
                .length() as usize;
            let reply = NetlinkMessage::<RouteNetlinkMessage>::deserialize(bytes)
                .map_err(|e| netlink_error(e.to_string()))?;

            match reply.payload {
                NetlinkPayload::Done(_) => return Ok(filters),
                NetlinkPayload::Error(err) => {
                    if let Some(code) = err.code {
                        return Err(io::Error::from_raw_os_error(-code.get()).into());
                    }
                }
                NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewTrafficFilter(msg)) => {
                    filters.push(msg)
                }
                _ => {}
            }

            if length == 0 {
                break;
            }
            // NLMSG_ALIGN
            offset += (length + 3) & !3;
        }
    }
}

fn netlink_error(message: String) -> TcLensError {
    TcLensError::NetnsError(format!("malformed netlink reply: {}", message))
}
