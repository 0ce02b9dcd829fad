use super::Tokenizer;

const BYTE_VOCAB_SIZE: usize = 256;

/// UTF-8 byte tokenizer with optional BOS/EOS/PAD ids appended after the
/// byte range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ByteTokenizer {
    bos: Option<u32>,
    eos: Option<u32>,
    pad: Option<u32>,
    vocab_size: usize,
    add_bos_token: bool,
}

impl ByteTokenizer {
    pub fn new(add_special_tokens: bool) -> Self {
        let mut vocab_size = BYTE_VOCAB_SIZE;
        let mut bos = None;
        let mut eos = None;
        let mut pad = None;

        if add_special_tokens {
            bos = Some(vocab_size as u32);
            vocab_size += 1;
            eos = Some(vocab_size as u32);
            vocab_size += 1;
            pad = Some(vocab_size as u32);
            vocab_size += 1;
        }

        Self {
            bos,
            eos,
            pad,
            vocab_size,
            add_bos_token: false,
        }
    }

    /// Makes the tokenizer report that it prepends BOS by itself. Has no
    /// effect without special tokens.
    pub fn with_add_bos_token(mut self, add_bos_token: bool) -> Self {
        self.add_bos_token = add_bos_token && self.bos.is_some();
        self
    }
}

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str, add_bos: bool, add_eos: bool) -> Vec<u32> {
        let mut tokens = Vec::with_capacity(text.len() + 2);
        if add_bos && let Some(bos) = self.bos {
            tokens.push(bos);
        }

        tokens.extend(text.as_bytes().iter().map(|byte| *byte as u32));

        if add_eos && let Some(eos) = self.eos {
            tokens.push(eos);
        }

        tokens
    }

    fn decode(&self, ids: &[u32]) -> String {
        let mut bytes = Vec::with_capacity(ids.len());
        for &id in ids {
            if Some(id) == self.pad || Some(id) == self.bos {
                continue;
            }
            if Some(id) == self.eos {
                break;
            }
            if (id as usize) < BYTE_VOCAB_SIZE {
                bytes.push(id as u8);
            }
        }
        String::from_utf8_lossy(&bytes).to_string()
    }

    fn len(&self) -> usize {
        self.vocab_size
    }

    fn bos_id(&self) -> Option<u32> {
        self.bos
    }

    fn eos_id(&self) -> Option<u32> {
        self.eos
    }

    fn pad_id(&self) -> Option<u32> {
        self.pad
    }

    fn add_bos_token(&self) -> bool {
        self.add_bos_token
    }
}
