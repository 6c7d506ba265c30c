//! Encryption schemes which may be negotiated for Discord's secure RTP.
//!
//! Packet encryption itself is left to the audio layer: this crate only
//! announces and validates the scheme chosen during the voice handshake.

/// Variants of the XSalsa20Poly1305 encryption scheme.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CryptoMode {
    /// The RTP header is used as the source of nonce bytes for the packet.
    #[default]
    Normal,
    /// An additional random 24B suffix is used as the source of nonce bytes for the packet.
    Suffix,
    /// An additional random 4B suffix is used as the source of nonce bytes for the packet.
    Lite,
}

impl CryptoMode {
    /// Returns the name of a mode as it will appear during negotiation.
    #[must_use]
    pub fn to_request_str(self) -> &'static str {
        use CryptoMode::*;
        match self {
            Normal => "xsalsa20_poly1305",
            Suffix => "xsalsa20_poly1305_suffix",
            Lite => "xsalsa20_poly1305_lite",
        }
    }

    /// Returns whether a server's list of offered modes includes this one.
    pub fn is_offered<T, It>(self, modes: It) -> bool
    where
        T: AsRef<str>,
        It: IntoIterator<Item = T>,
    {
        modes
            .into_iter()
            .any(|s| s.as_ref() == self.to_request_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn offered_modes_are_matched_by_name() {
        let offered = ["xsalsa20_poly1305_lite", "aead_aes256_gcm"];

        assert!(CryptoMode::Lite.is_offered(offered));
        assert!(!CryptoMode::Normal.is_offered(offered));
        assert!(!CryptoMode::Suffix.is_offered(Vec::<String>::new()));
    }
}
