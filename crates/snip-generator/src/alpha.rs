use crate::Generator;
use rand::Rng;
use snip_core::shortcode::CODE_LENGTH;
use snip_core::ShortCode;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Draws every character of a code uniformly from the 52 ASCII letters.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphaGenerator;

impl AlphaGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Generator for AlphaGenerator {
    type Output = ShortCode;

    fn generate(&self) -> Self::Output {
        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LENGTH)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        ShortCode::new_unchecked(code)
    }
}
