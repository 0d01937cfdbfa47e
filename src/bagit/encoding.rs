use crate::bagit::consts::*;
use crate::bagit::error::*;
use encoding_rs::Encoding;
use std::borrow::Cow;

const CR_ENCODED: &str = "%0D";
const LF_ENCODED: &str = "%0A";
const PERCENT_ENCODED: &str = "%25";

/// The character set tag files are decoded from and encoded to, as declared
/// by `Tag-File-Character-Encoding`. Any name from the accepted set may be
/// carried in memory, but only names that map to a known encoding can
/// actually transcode; the rest fail when text is first decoded or encoded.
#[derive(Debug, Clone)]
pub struct TagEncoding {
    name: String,
    encoding: Option<&'static Encoding>,
}

/// Percent encodes any CR, LF, or % characters in the input string
pub fn percent_encode(value: &str) -> Cow<str> {
    if let Some(i) = value.find(|c: char| c == CR || c == LF || c == '%') {
        let mut encoded = Vec::with_capacity(value.len() + 2);
        encoded.extend_from_slice(value[..i].as_bytes());

        let search = value[i..].bytes();

        for c in search {
            match c {
                CR_B => encoded.extend_from_slice(CR_ENCODED.as_bytes()),
                LF_B => encoded.extend_from_slice(LF_ENCODED.as_bytes()),
                b'%' => encoded.extend_from_slice(PERCENT_ENCODED.as_bytes()),
                _ => encoded.push(c),
            }
        }

        // This is fine because the original value is known to be valid UTF-8
        Cow::Owned(unsafe { String::from_utf8_unchecked(encoded) })
    } else {
        value.into()
    }
}

/// Decodes the `%0A`, `%0D`, and `%25` triplets to LF, CR, and %. Any other
/// percent triplet, or a dangling %, fails the decode.
pub fn percent_decode(value: &str) -> Result<Cow<str>> {
    if !value.contains('%') {
        return Ok(value.into());
    }

    let mut decoded = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(i) = rest.find('%') {
        decoded.push_str(&rest[..i]);
        let triplet = rest.get(i..i + 3).unwrap_or(&rest[i..]);

        match triplet.to_uppercase().as_str() {
            LF_ENCODED => decoded.push(LF),
            CR_ENCODED => decoded.push(CR),
            PERCENT_ENCODED => decoded.push('%'),
            _ => {
                return Err(Error::InvalidPercentEncoding {
                    value: value.into(),
                })
            }
        }

        rest = &rest[i + 3..];
    }

    decoded.push_str(rest);
    Ok(Cow::Owned(decoded))
}

impl TagEncoding {
    /// Creates a tag encoding, rejecting names outside of the accepted set
    pub fn new<S: AsRef<str>>(name: S) -> Result<Self> {
        let name = name.as_ref();
        let accepted = CHARACTER_SETS
            .iter()
            .copied()
            .find(|cs| cs.eq_ignore_ascii_case(name));

        match accepted {
            Some(canonical) => Ok(Self::resolve(canonical)),
            None => Err(Error::UnsupportedEncoding {
                encoding: name.into(),
            }),
        }
    }

    /// Creates a tag encoding from a loaded declaration. Unknown names are
    /// carried as-is; they fail later if tag text must actually be transcoded.
    pub fn lenient<S: AsRef<str>>(name: S) -> Self {
        match Self::new(name.as_ref()) {
            Ok(encoding) => encoding,
            Err(_) => Self {
                name: name.as_ref().into(),
                encoding: None,
            },
        }
    }

    fn resolve(canonical: &str) -> Self {
        Self {
            name: canonical.into(),
            encoding: Encoding::for_label(canonical.as_bytes()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_utf8(&self) -> bool {
        self.name.eq_ignore_ascii_case(UTF_8)
    }

    /// Decodes raw tag file bytes into UTF-8 text
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        if self.is_utf8() {
            return String::from_utf8(bytes.into()).context_charset(&self.name);
        }

        match self.encoding {
            Some(encoding) => {
                let (text, _, had_errors) = encoding.decode(bytes);
                if had_errors {
                    Err(Error::DecodeText {
                        charset: self.name.clone(),
                    })
                } else {
                    Ok(text.into_owned())
                }
            }
            None => Err(Error::DecodeText {
                charset: self.name.clone(),
            }),
        }
    }

    /// Encodes UTF-8 text into the tag file character set
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        if self.is_utf8() {
            return Ok(text.as_bytes().into());
        }

        match self.encoding {
            Some(encoding) => {
                let (bytes, _, had_errors) = encoding.encode(text);
                if had_errors {
                    Err(Error::EncodeText {
                        charset: self.name.clone(),
                    })
                } else {
                    Ok(bytes.into_owned())
                }
            }
            None => Err(Error::EncodeText {
                charset: self.name.clone(),
            }),
        }
    }
}

impl Default for TagEncoding {
    fn default() -> Self {
        Self::resolve(UTF_8)
    }
}

trait CharsetContext<T> {
    fn context_charset(self, charset: &str) -> Result<T>;
}

impl<T> CharsetContext<T> for std::result::Result<T, std::string::FromUtf8Error> {
    fn context_charset(self, charset: &str) -> Result<T> {
        self.map_err(|_| Error::DecodeText {
            charset: charset.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_encoding() {
        assert_eq!(
            "a\tbc%25123%0Dqwe%0A%25%25asd%0D%0A !",
            percent_encode("a\tbc%123\rqwe\n%%asd\r\n !")
        );
        assert_eq!("nothing to see here", percent_encode("nothing to see here"));
    }

    #[test]
    fn decode_only_supports_cr_lf_and_percent() {
        assert_eq!("a\r\nb", percent_decode("a%0D%0Ab").unwrap());
        assert_eq!("100%", percent_decode("100%25").unwrap());
        assert_eq!("plain", percent_decode("plain").unwrap());
        assert!(percent_decode("file%20name").is_err());
        assert!(percent_decode("dangling%2").is_err());
    }

    #[test]
    fn decode_is_case_insensitive() {
        assert_eq!("a\nb", percent_decode("a%0ab").unwrap());
    }

    #[test]
    fn encode_decode_round_trip() {
        let original = "dir\r\nwith%everything\n";
        let encoded = percent_encode(original);
        assert_eq!(original, percent_decode(&encoded).unwrap());
    }

    #[test]
    fn known_charsets_transcode() {
        let latin1 = TagEncoding::new("ISO-8859-1").unwrap();
        let bytes = latin1.encode("café").unwrap();
        assert_eq!(vec![b'c', b'a', b'f', 0xE9], bytes);
        assert_eq!("café", latin1.decode(&bytes).unwrap());
    }

    #[test]
    fn unknown_charsets_are_rejected() {
        assert!(TagEncoding::new("KLINGON-1").is_err());

        let lenient = TagEncoding::lenient("KLINGON-1");
        assert_eq!("KLINGON-1", lenient.name());
        assert!(lenient.decode(b"abc").is_err());
    }

    #[test]
    fn accepted_name_without_transcoder_fails_at_use() {
        let iso2022kr = TagEncoding::new("ISO-2022-KR").unwrap();
        assert!(iso2022kr.decode(b"\x1b$)Cabc").is_err());
    }
}
