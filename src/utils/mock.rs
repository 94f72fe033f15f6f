//! A scripted transport standing in for the serial link in unit tests.

use std::{collections::VecDeque, io, time::Duration};

use crate::transport::Transport;
use crate::xmodem::{ACK, EOT, FRAME_LEN, SOH};

/// What the standalone boot-loader prints when it is provoked.
pub(crate) const MENU: &[u8] = b"\r\nEFR32 Serial Btl v5.8.0\r\n1. upload ebl\r\n2. run\r\n3. ebl info\r\nBL > ";

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8>>;

/// Records every write and queues the responder's answer to it. Reads pop
/// the queue; an empty queue reads as a timeout.
pub(crate) struct MockTransport {
    /// Every `send`, in order.
    pub writes: Vec<Vec<u8>>,
    pending: VecDeque<u8>,
    responder: Responder,
    /// Sends still allowed to succeed, unlimited when `None`.
    sends_left: Option<usize>,
}
impl MockTransport {
    pub(crate) fn new(responder: impl FnMut(&[u8]) -> Vec<u8> + 'static) -> Self {
        MockTransport {
            writes: vec![],
            pending: VecDeque::new(),
            responder: Box::new(responder),
            sends_left: None,
        }
    }

    /// Make bytes available to read before anything is sent.
    pub(crate) fn queue(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes.iter().copied());
    }

    pub(crate) fn pending(&self) -> &VecDeque<u8> {
        &self.pending
    }

    /// All the sent bytes, concatenated.
    pub(crate) fn sent(&self) -> Vec<u8> {
        self.writes.concat()
    }

    /// Make every following `send` fail as if the port was unplugged.
    pub(crate) fn fail_sends(&mut self) {
        self.fail_sends_after(0);
    }

    /// Let `count` more sends through, then fail every following one.
    pub(crate) fn fail_sends_after(&mut self, count: usize) {
        self.sends_left = Some(count);
    }
}
impl Transport for MockTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.sends_left.as_mut() {
            Some(0) => return Err(io::Error::new(io::ErrorKind::BrokenPipe, "port unplugged")),
            Some(left) => *left -= 1,
            None => {}
        }
        self.writes.push(bytes.to_vec());
        let answer = (self.responder)(bytes);
        self.pending.extend(answer);
        Ok(())
    }

    fn recv_timeout(&mut self, _timeout: Duration) -> io::Result<Option<u8>> {
        Ok(self.pending.pop_front())
    }
}

/// A responder behaving like the boot-loader: the menu when provoked, the
/// start character after the upload command, and an Xmodem receiver
/// answering block `number` on its `attempt`-th sending with
/// `answer(number, attempt)`. The end of transmission is acknowledged and
/// the run command is echoed.
pub(crate) fn bootloader(mut answer: impl FnMut(u8, usize) -> u8 + 'static) -> impl FnMut(&[u8]) -> Vec<u8> + 'static {
    let mut last: Option<(u8, usize)> = None;
    move |bytes: &[u8]| match bytes {
        [b'\r'] => MENU.to_vec(),
        [b'1'] => b"1\r\nbegin upload\r\nC".to_vec(),
        [b'2'] => b"2\r\n".to_vec(),
        [EOT] => vec![ACK],
        frame if frame.len() == FRAME_LEN && frame[0] == SOH => {
            let number = frame[1];
            let attempt = match last {
                Some((n, a)) if n == number => a + 1,
                _ => 1,
            };
            last = Some((number, attempt));
            vec![answer(number, attempt)]
        }
        _ => vec![],
    }
}

/// The Xmodem blocks among recorded writes.
pub(crate) fn frames(writes: &[Vec<u8>]) -> Vec<Vec<u8>> {
    writes
        .iter()
        .filter(|w| w.len() == FRAME_LEN && w[0] == SOH)
        .cloned()
        .collect()
}
