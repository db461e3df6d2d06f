use std::sync::Arc;

/// External address-format collaborator. The dispatcher treats any decode
/// failure as a validation failure and never interprets the address's
/// internal structure itself.
pub trait AddressValidator: Send + Sync {
    fn decode(&self, address: &str) -> Result<(), String>;
}

pub type SharedValidator = Arc<dyn AddressValidator>;

impl<F> AddressValidator for F
where
    F: Fn(&str) -> Result<(), String> + Send + Sync,
{
    fn decode(&self, address: &str) -> Result<(), String> {
        self(address)
    }
}

/// Alphabet-level check used by the gateway binary until a full decoder is
/// wired in by the deployment: base58 charset, sane length bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base58Alphabet;

const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

impl AddressValidator for Base58Alphabet {
    fn decode(&self, address: &str) -> Result<(), String> {
        if address.is_empty() {
            return Err("address is empty".to_string());
        }

        if address.len() < 20 || address.len() > 128 {
            return Err(format!("address length {} out of bounds", address.len()));
        }

        match address.chars().find(|c| !BASE58.contains(*c)) {
            Some(c) => Err(format!("address contains invalid character '{}'", c)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_plausible_address() {
        let validator = Base58Alphabet;
        assert!(validator.decode("4AdUndXHHZ6cfufTMvppY6JwXNouMBzSkbLYfpAV5Usx").is_ok());
    }

    #[test]
    fn rejects_empty_and_short_addresses() {
        let validator = Base58Alphabet;
        assert!(validator.decode("").is_err());
        assert!(validator.decode("tooshort").is_err());
    }

    #[test]
    fn rejects_characters_outside_the_alphabet() {
        let validator = Base58Alphabet;
        // '0' and 'O' are excluded from base58.
        assert!(validator.decode("0AdUndXHHZ6cfufTMvppY6JwXNouMBzSkbLYfpAV5Usx").is_err());
        assert!(validator.decode("OAdUndXHHZ6cfufTMvppY6JwXNouMBzSkbLYfpAV5Usx").is_err());
    }

    #[test]
    fn closures_satisfy_the_collaborator_seam() {
        let reject_all = |_: &str| -> Result<(), String> { Err("nope".to_string()) };
        assert!(reject_all.decode("anything").is_err());
    }
}
