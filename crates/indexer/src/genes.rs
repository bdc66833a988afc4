//! Kai expansion of the `statGenes` integer.
//!
//! A hero's stat genes are one big integer which, written in base 32 with the
//! kai alphabet, spells out 48 characters: 12 gene slots of 4 levels each.
//! Only the expansion lives here; interpreting raw ids as traits is the
//! business of the external gene decoder.

use {
    alloy::primitives::U256,
    anyhow::{Context, Result, bail},
    database::tavern_heroes::{GeneSet, GeneSlot},
};

/// The 32-character base of the gene encoding. Note the missing `0` and `l`.
pub const KAI_ALPHABET: &str = "123456789abcdefghijkmnopqrstuvwx";

const KAI_LEN: usize = 48;
const SLOTS: usize = 12;

pub fn kai_index(ch: char) -> Option<u8> {
    KAI_ALPHABET.find(ch).map(|index| index as u8)
}

/// Renders a statGenes integer (decimal string, as the GraphQL API returns
/// it) as its 48-character kai string, most significant character first.
pub fn stat_genes_to_kai(stat_genes: &str) -> Result<String> {
    let mut value: U256 = stat_genes
        .parse()
        .with_context(|| format!("statGenes is not an integer: {stat_genes:?}"))?;
    let alphabet: Vec<char> = KAI_ALPHABET.chars().collect();
    let base = U256::from(32u64);
    let mut kai = ['1'; KAI_LEN];
    for slot in kai.iter_mut().rev() {
        let digit = (value % base).to::<u64>() as usize;
        *slot = alphabet[digit];
        value /= base;
    }
    if !value.is_zero() {
        bail!("statGenes does not fit 48 kai characters: {stat_genes:?}");
    }
    Ok(kai.into_iter().collect())
}

/// Inverse of [`stat_genes_to_kai`].
pub fn kai_to_stat_genes(kai: &str) -> Result<String> {
    let mut value = U256::ZERO;
    for ch in kai.chars() {
        let index = kai_index(ch).with_context(|| format!("not a kai character: {ch:?}"))?;
        value = value * U256::from(32u64) + U256::from(index);
    }
    Ok(value.to_string())
}

/// Expands a statGenes integer into the 12 gene slots. Within a slot the kai
/// characters run recessive-first: `[r3, r2, r1, dominant]`.
pub fn decode_stat_genes(stat_genes: &str) -> Result<GeneSet> {
    let kai = stat_genes_to_kai(stat_genes)?;
    let raw: Vec<i32> = kai
        .chars()
        .map(|ch| kai_index(ch).map(i32::from))
        .collect::<Option<_>>()
        .context("kai string contains invalid characters")?;
    let mut slots = [GeneSlot::default(); SLOTS];
    for (slot_index, slot) in slots.iter_mut().enumerate() {
        let genes = &raw[slot_index * 4..slot_index * 4 + 4];
        *slot = GeneSlot {
            r3: genes[0],
            r2: genes[1],
            r1: genes[2],
            d: genes[3],
        };
    }
    Ok(GeneSet(slots))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_has_32_distinct_characters() {
        assert_eq!(KAI_ALPHABET.len(), 32);
        let mut chars: Vec<char> = KAI_ALPHABET.chars().collect();
        chars.dedup();
        assert_eq!(chars.len(), 32);
        assert_eq!(kai_index('1'), Some(0));
        assert_eq!(kai_index('x'), Some(31));
        assert_eq!(kai_index('0'), None);
        assert_eq!(kai_index('l'), None);
    }

    #[test]
    fn kai_roundtrip_is_a_bijection() {
        for genes in ["0", "1", "31", "123456789012345678901234567890"] {
            let kai = stat_genes_to_kai(genes).unwrap();
            assert_eq!(kai.len(), 48);
            assert_eq!(kai_to_stat_genes(&kai).unwrap(), genes);
        }

        let kai = "2345678911111111111111111111111111111111111111xw";
        let genes = kai_to_stat_genes(kai).unwrap();
        assert_eq!(stat_genes_to_kai(&genes).unwrap(), kai);
    }

    #[test]
    fn decodes_slots_recessive_first() {
        // slot 0 spelled "2345": r3=1, r2=2, r1=3, d=4; everything else "1"
        let kai = format!("2345{}", "1".repeat(44));
        let genes = kai_to_stat_genes(&kai).unwrap();
        let decoded = decode_stat_genes(&genes).unwrap();
        assert_eq!(
            decoded.0[0],
            GeneSlot {
                r3: 1,
                r2: 2,
                r1: 3,
                d: 4
            }
        );
        assert_eq!(decoded.0[1], GeneSlot::default());
    }

    #[test]
    fn rejects_oversized_and_malformed_input() {
        assert!(decode_stat_genes("not a number").is_err());
        // 32^48 is the first integer needing 49 kai digits
        let oversized = U256::from(2u64).pow(U256::from(240u64)).to_string();
        assert!(decode_stat_genes(&oversized).is_err());
    }
}
