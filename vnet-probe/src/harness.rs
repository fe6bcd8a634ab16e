// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Access to the wire.
//!
//! The verification engine only ever talks to the device through a
//! `PacketHarness`: it injects frames on a port and waits, with a deadline,
//! for a frame matching an expectation to appear on one or more ports.

use std::time::Duration;

use packet::mask::Mask;

use crate::types::ProbeResult;

/// The index of one of the device's physical ports.
pub type PhysPort = u16;

pub trait PacketHarness {
    /// Transmit a frame toward the device on `port`.
    fn send(&mut self, port: PhysPort, frame: &[u8]) -> ProbeResult<()>;

    /// Wait up to `timeout` for `frame`, byte for byte, to arrive on `port`.
    /// Other traffic arriving in the meantime is discarded.
    fn expect_exact(
        &mut self,
        port: PhysPort,
        frame: &[u8],
        timeout: Duration,
    ) -> ProbeResult<bool>;

    /// Wait up to `timeout` for a frame matching `mask` to arrive on any of
    /// `ports`, returning the port it arrived on.
    fn expect_on_any_of(
        &mut self,
        ports: &[PhysPort],
        mask: &Mask,
        timeout: Duration,
    ) -> ProbeResult<Option<PhysPort>>;

    /// Throw away anything already queued on any port.
    fn flush(&mut self) -> ProbeResult<()>;
}

impl<H: PacketHarness + ?Sized> PacketHarness for &mut H {
    fn send(&mut self, port: PhysPort, frame: &[u8]) -> ProbeResult<()> {
        (**self).send(port, frame)
    }

    fn expect_exact(
        &mut self,
        port: PhysPort,
        frame: &[u8],
        timeout: Duration,
    ) -> ProbeResult<bool> {
        (**self).expect_exact(port, frame, timeout)
    }

    fn expect_on_any_of(
        &mut self,
        ports: &[PhysPort],
        mask: &Mask,
        timeout: Duration,
    ) -> ProbeResult<Option<PhysPort>> {
        (**self).expect_on_any_of(ports, mask, timeout)
    }

    fn flush(&mut self) -> ProbeResult<()> {
        (**self).flush()
    }
}

#[cfg(target_os = "linux")]
pub use raw::RawHarness;

#[cfg(target_os = "linux")]
mod raw {
    use std::collections::BTreeMap;
    use std::ffi::CString;
    use std::mem;
    use std::os::fd::AsRawFd;
    use std::time::{Duration, Instant};

    use packet::mask::Mask;
    use slog::{debug, trace};
    use socket2::{Domain, Protocol, Socket, Type};

    use super::{PacketHarness, PhysPort};
    use crate::macaddrs::port_ifname;
    use crate::types::{ProbeError, ProbeResult};

    const ETH_P_ALL: u16 = 0x0003;
    const ETH_P_8021Q: u16 = 0x8100;
    const PACKET_OUTGOING: u8 = 4;
    const PACKET_AUXDATA: libc::c_int = 8;
    const TP_STATUS_VLAN_VALID: u32 = 1 << 4;
    const TP_STATUS_VLAN_TPID_VALID: u32 = 1 << 6;
    const MAX_FRAME: usize = 9216;

    // struct tpacket_auxdata from <linux/if_packet.h>
    #[repr(C)]
    #[allow(dead_code)]
    #[derive(Clone, Copy)]
    struct AuxData {
        tp_status: u32,
        tp_len: u32,
        tp_snaplen: u32,
        tp_mac: u16,
        tp_net: u16,
        tp_vlan_tci: u16,
        tp_vlan_tpid: u16,
    }

    fn harness_err(
        what: &str,
        ifname: &str,
        e: impl std::fmt::Display,
    ) -> ProbeError {
        ProbeError::Harness(format!("{what} on {ifname}: {e}"))
    }

    struct PortSocket {
        ifname: String,
        sock: Socket,
    }

    impl PortSocket {
        fn open(port: PhysPort) -> ProbeResult<Self> {
            let ifname = port_ifname(port);
            let proto = Protocol::from(ETH_P_ALL.to_be() as i32);
            let sock = Socket::new(Domain::PACKET, Type::RAW, Some(proto))
                .map_err(|e| harness_err("socket", &ifname, e))?;

            let c_name = CString::new(ifname.clone())
                .map_err(|e| harness_err("interface name", &ifname, e))?;
            // SAFETY: c_name is a valid NUL-terminated string.
            let ifindex = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
            if ifindex == 0 {
                return Err(harness_err(
                    "if_nametoindex",
                    &ifname,
                    std::io::Error::last_os_error(),
                ));
            }

            // SAFETY: sockaddr_ll is plain old data, and the pointer and
            // length describe it exactly.
            let rval = unsafe {
                let mut sll: libc::sockaddr_ll = mem::zeroed();
                sll.sll_family = libc::AF_PACKET as u16;
                sll.sll_protocol = ETH_P_ALL.to_be();
                sll.sll_ifindex = ifindex as i32;
                libc::bind(
                    sock.as_raw_fd(),
                    &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if rval < 0 {
                return Err(harness_err(
                    "bind",
                    &ifname,
                    std::io::Error::last_os_error(),
                ));
            }

            // The kernel strips 802.1Q tags on receive and reports them as
            // auxiliary data, so ask for that data to put the tags back.
            let on: libc::c_int = 1;
            // SAFETY: the option value is a c_int that outlives the call.
            let rval = unsafe {
                libc::setsockopt(
                    sock.as_raw_fd(),
                    libc::SOL_PACKET,
                    PACKET_AUXDATA,
                    &on as *const libc::c_int as *const libc::c_void,
                    mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            };
            if rval < 0 {
                return Err(harness_err(
                    "setsockopt",
                    &ifname,
                    std::io::Error::last_os_error(),
                ));
            }

            sock.set_nonblocking(true)
                .map_err(|e| harness_err("set_nonblocking", &ifname, e))?;
            Ok(PortSocket { ifname, sock })
        }

        /// Read one incoming frame, if any is queued.  Frames we transmitted
        /// ourselves are skipped.
        fn recv(&self) -> ProbeResult<Option<Vec<u8>>> {
            loop {
                let mut buf = vec![0u8; MAX_FRAME];
                // u64s keep the control buffer aligned for cmsghdr
                let mut cbuf = [0u64; 8];
                // SAFETY: every pointer handed to recvmsg refers to a live
                // local buffer whose length is passed alongside it.
                let (n, sll, aux) = unsafe {
                    let mut sll: libc::sockaddr_ll = mem::zeroed();
                    let mut iov = libc::iovec {
                        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
                        iov_len: buf.len(),
                    };
                    let mut msg: libc::msghdr = mem::zeroed();
                    msg.msg_name =
                        &mut sll as *mut libc::sockaddr_ll as *mut libc::c_void;
                    msg.msg_namelen =
                        mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
                    msg.msg_iov = &mut iov;
                    msg.msg_iovlen = 1;
                    msg.msg_control = cbuf.as_mut_ptr() as *mut libc::c_void;
                    msg.msg_controllen = mem::size_of_val(&cbuf) as _;

                    let n = libc::recvmsg(self.sock.as_raw_fd(), &mut msg, 0);
                    let mut aux = None;
                    if n >= 0 {
                        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
                        while !cmsg.is_null() {
                            if (*cmsg).cmsg_level == libc::SOL_PACKET
                                && (*cmsg).cmsg_type == PACKET_AUXDATA
                            {
                                aux = Some(std::ptr::read_unaligned(
                                    libc::CMSG_DATA(cmsg) as *const AuxData,
                                ));
                            }
                            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
                        }
                    }
                    (n, sll, aux)
                };

                if n < 0 {
                    let err = std::io::Error::last_os_error();
                    return match err.kind() {
                        std::io::ErrorKind::WouldBlock => Ok(None),
                        std::io::ErrorKind::Interrupted => continue,
                        _ => Err(harness_err("recv", &self.ifname, err)),
                    };
                }
                if sll.sll_pkttype == PACKET_OUTGOING {
                    continue;
                }

                buf.truncate(n as usize);
                if let Some(aux) = aux {
                    if aux.tp_status & TP_STATUS_VLAN_VALID != 0 && buf.len() >= 12
                    {
                        let tpid = if aux.tp_status & TP_STATUS_VLAN_TPID_VALID != 0 {
                            aux.tp_vlan_tpid
                        } else {
                            ETH_P_8021Q
                        };
                        let mut tag = tpid.to_be_bytes().to_vec();
                        tag.extend_from_slice(&aux.tp_vlan_tci.to_be_bytes());
                        buf.splice(12..12, tag);
                    }
                }
                return Ok(Some(buf));
            }
        }
    }

    /// A harness backed by one `AF_PACKET` socket per `ethN` interface.
    pub struct RawHarness {
        log: slog::Logger,
        ports: BTreeMap<PhysPort, PortSocket>,
    }

    impl RawHarness {
        pub fn open(log: &slog::Logger, ports: &[PhysPort]) -> ProbeResult<Self> {
            let log = log.new(slog::o!("unit" => "raw-harness"));
            let mut map = BTreeMap::new();
            for port in ports {
                if map.contains_key(port) {
                    continue;
                }
                let sock = PortSocket::open(*port)?;
                debug!(log, "opened port"; "ifname" => &sock.ifname);
                map.insert(*port, sock);
            }
            Ok(RawHarness { log, ports: map })
        }

        fn socket(&self, port: PhysPort) -> ProbeResult<&PortSocket> {
            self.ports.get(&port).ok_or_else(|| {
                ProbeError::Harness(format!("port {port} was not opened"))
            })
        }

        // Poll `ports` until a frame satisfying `matches` arrives or the
        // deadline passes.
        fn wait_for(
            &self,
            ports: &[PhysPort],
            timeout: Duration,
            matches: impl Fn(&[u8]) -> bool,
        ) -> ProbeResult<Option<PhysPort>> {
            let socks = ports
                .iter()
                .map(|p| self.socket(*p).map(|s| (*p, s)))
                .collect::<ProbeResult<Vec<_>>>()?;
            let deadline = Instant::now() + timeout;

            loop {
                for (port, sock) in &socks {
                    while let Some(frame) = sock.recv()? {
                        if matches(&frame) {
                            return Ok(Some(*port));
                        }
                        trace!(self.log, "discarding frame";
                            "ifname" => &sock.ifname,
                            "len" => frame.len());
                    }
                }

                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                let wait = (deadline - now).as_millis().max(1) as libc::c_int;
                let mut fds: Vec<libc::pollfd> = socks
                    .iter()
                    .map(|(_, s)| libc::pollfd {
                        fd: s.sock.as_raw_fd(),
                        events: libc::POLLIN,
                        revents: 0,
                    })
                    .collect();
                // SAFETY: fds is a live array of fds.len() pollfds.
                let rval = unsafe {
                    libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, wait)
                };
                if rval < 0 {
                    let err = std::io::Error::last_os_error();
                    if err.kind() != std::io::ErrorKind::Interrupted {
                        return Err(ProbeError::Harness(format!("poll: {err}")));
                    }
                }
            }
        }
    }

    impl PacketHarness for RawHarness {
        fn send(&mut self, port: PhysPort, frame: &[u8]) -> ProbeResult<()> {
            let sock = self.socket(port)?;
            let n = sock
                .sock
                .send(frame)
                .map_err(|e| harness_err("send", &sock.ifname, e))?;
            if n != frame.len() {
                return Err(harness_err(
                    "send",
                    &sock.ifname,
                    format!("short write of {n}/{} bytes", frame.len()),
                ));
            }
            Ok(())
        }

        fn expect_exact(
            &mut self,
            port: PhysPort,
            frame: &[u8],
            timeout: Duration,
        ) -> ProbeResult<bool> {
            self.wait_for(&[port], timeout, |data| data == frame)
                .map(|p| p.is_some())
        }

        fn expect_on_any_of(
            &mut self,
            ports: &[PhysPort],
            mask: &Mask,
            timeout: Duration,
        ) -> ProbeResult<Option<PhysPort>> {
            self.wait_for(ports, timeout, |data| mask.matches(data))
        }

        fn flush(&mut self) -> ProbeResult<()> {
            for sock in self.ports.values() {
                while sock.recv()?.is_some() {}
            }
            Ok(())
        }
    }
}

/// Raw packet sockets are Linux-only.
#[cfg(not(target_os = "linux"))]
pub enum RawHarness {}

#[cfg(not(target_os = "linux"))]
impl RawHarness {
    pub fn open(_log: &slog::Logger, _ports: &[PhysPort]) -> ProbeResult<Self> {
        Err(crate::types::ProbeError::Harness(
            "raw packet sockets are only supported on linux".to_string(),
        ))
    }
}

#[cfg(not(target_os = "linux"))]
impl PacketHarness for RawHarness {
    fn send(&mut self, _port: PhysPort, _frame: &[u8]) -> ProbeResult<()> {
        match *self {}
    }

    fn expect_exact(
        &mut self,
        _port: PhysPort,
        _frame: &[u8],
        _timeout: Duration,
    ) -> ProbeResult<bool> {
        match *self {}
    }

    fn expect_on_any_of(
        &mut self,
        _ports: &[PhysPort],
        _mask: &Mask,
        _timeout: Duration,
    ) -> ProbeResult<Option<PhysPort>> {
        match *self {}
    }

    fn flush(&mut self) -> ProbeResult<()> {
        match *self {}
    }
}
