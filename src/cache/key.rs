use std::fmt;

/// Identity of one logical session's beacon buffer.
///
/// The sequence number distinguishes split instances of the same session, so
/// every split continues under a fresh key while the drained predecessor is
/// still being sent. Lookup is by value equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BeaconKey {
    pub session_id: i32,
    pub session_sequence_number: i32,
}

impl BeaconKey {
    pub fn new(session_id: i32, session_sequence_number: i32) -> Self {
        Self {
            session_id,
            session_sequence_number,
        }
    }

    /// Key for the next split instance of the same session.
    pub fn next_sequence(&self) -> Self {
        Self {
            session_id: self.session_id,
            session_sequence_number: self.session_sequence_number + 1,
        }
    }
}

impl fmt::Display for BeaconKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id, self.session_sequence_number)
    }
}
