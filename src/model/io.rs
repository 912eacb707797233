//! Text persistence for trained models.
//!
//! The format is ASCII, one row per line, suitable for stream parsing:
//!
//! ```text
//! m <m>
//! n <n>
//! k <k>
//! p0 <k floats>
//! ...
//! q0 <k floats>
//! ...
//! ```
//!
//! Floats are written with nine significant digits so an f32 round-trips
//! exactly. Any structural defect on load (missing header, wrong row tag,
//! short row, short file) is reported as [`Error::CorruptModel`].

use std::io::{BufRead, Write};

use crate::data::AlignedBuffer;
use crate::error::{Error, Result};

use super::Model;

/// Write `model` in the text format.
pub fn save_model(model: &Model, mut w: impl Write) -> Result<()> {
    writeln!(w, "m {}", model.m())?;
    writeln!(w, "n {}", model.n())?;
    writeln!(w, "k {}", model.k())?;

    for u in 0..model.m() {
        write!(w, "p{}", u)?;
        for &x in model.p_row(u) {
            write!(w, " {:.8e}", x)?;
        }
        writeln!(w)?;
    }
    for v in 0..model.n() {
        write!(w, "q{}", v)?;
        for &x in model.q_row(v) {
            write!(w, " {:.8e}", x)?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Read a model written by [`save_model`].
pub fn load_model(r: impl BufRead) -> Result<Model> {
    let mut lines = r.lines();
    let mut header = |name: &str| -> Result<u64> {
        let line = lines
            .next()
            .ok_or_else(|| Error::corrupt(format!("missing `{}` header", name)))??;
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(tag), Some(value)) if tag == name => value
                .parse()
                .map_err(|_| Error::corrupt(format!("bad `{}` header value {:?}", name, value))),
            _ => Err(Error::corrupt(format!("missing `{}` header", name))),
        }
    };
    let m = header("m")? as u32;
    let n = header("n")? as u32;
    let k = header("k")? as usize;
    if k == 0 {
        return Err(Error::corrupt("k must be positive"));
    }

    let mut read_rows = |prefix: char, rows: u32| -> Result<AlignedBuffer> {
        let mut buf = AlignedBuffer::zeroed(rows as usize * k)?;
        let s = buf.as_mut_slice();
        for i in 0..rows {
            let tag = format!("{}{}", prefix, i);
            let line = lines
                .next()
                .ok_or_else(|| Error::corrupt(format!("file ends before row {}", tag)))??;
            let mut fields = line.split_whitespace();
            if fields.next() != Some(tag.as_str()) {
                return Err(Error::corrupt(format!("expected row {}", tag)));
            }
            let row = &mut s[i as usize * k..(i as usize + 1) * k];
            for (d, slot) in row.iter_mut().enumerate() {
                let field = fields
                    .next()
                    .ok_or_else(|| Error::corrupt(format!("row {} has fewer than {} values", tag, k)))?;
                *slot = field
                    .parse()
                    .map_err(|_| Error::corrupt(format!("row {} value {} is not a float", tag, d)))?;
            }
        }
        Ok(buf)
    };
    let p = read_rows('p', m)?;
    let q = read_rows('q', n)?;

    Ok(Model::from_parts(m, n, k, p, q))
}

impl Model {
    /// Write the user factors, one `k`-float row per user.
    pub fn write_p_factors(&self, mut w: impl Write) -> Result<()> {
        for u in 0..self.m() {
            write_factor_row(&mut w, self.p_row(u))?;
        }
        Ok(())
    }

    /// Write the item factors, one `k`-float row per item.
    pub fn write_q_factors(&self, mut w: impl Write) -> Result<()> {
        for v in 0..self.n() {
            write_factor_row(&mut w, self.q_row(v))?;
        }
        Ok(())
    }
}

fn write_factor_row(w: &mut impl Write, row: &[f32]) -> Result<()> {
    let mut sep = "";
    for &x in row {
        write!(w, "{}{:.8e}", sep, x)?;
        sep = " ";
    }
    writeln!(w)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::FactorRng;
    use std::io::Cursor;

    fn sample_model() -> Model {
        let mut rng = FactorRng::seed_from_u64(99);
        let mut model = Model::init(5, 4, 3, &mut rng).unwrap();
        model.shrink(3);
        model
    }

    #[test]
    fn test_save_load_round_trip_is_exact() {
        let model = sample_model();
        let mut bytes = Vec::new();
        save_model(&model, &mut bytes).unwrap();

        let loaded = load_model(Cursor::new(bytes)).unwrap();
        assert_eq!(loaded.m(), model.m());
        assert_eq!(loaded.n(), model.n());
        assert_eq!(loaded.k(), model.k());
        for u in 0..model.m() {
            for (a, b) in loaded.p_row(u).iter().zip(model.p_row(u)) {
                assert_eq!(a.to_bits(), b.to_bits());
            }
        }
        for v in 0..model.n() {
            for (a, b) in loaded.q_row(v).iter().zip(model.q_row(v)) {
                assert_eq!(a.to_bits(), b.to_bits());
            }
        }
    }

    #[test]
    fn test_load_rejects_missing_header() {
        let r = load_model(Cursor::new("m 2\nk 3\n"));
        assert!(matches!(r, Err(Error::CorruptModel(_))));
    }

    #[test]
    fn test_load_rejects_short_row() {
        let text = "m 1\nn 1\nk 3\np0 1.0 2.0\nq0 1.0 2.0 3.0\n";
        let r = load_model(Cursor::new(text));
        assert!(matches!(r, Err(Error::CorruptModel(_))));
    }

    #[test]
    fn test_load_rejects_short_file() {
        let text = "m 2\nn 1\nk 2\np0 1.0 2.0\n";
        let r = load_model(Cursor::new(text));
        assert!(matches!(r, Err(Error::CorruptModel(_))));
    }

    #[test]
    fn test_load_rejects_wrong_tag() {
        let text = "m 1\nn 1\nk 1\nq0 1.0\np0 1.0\n";
        let r = load_model(Cursor::new(text));
        assert!(matches!(r, Err(Error::CorruptModel(_))));
    }

    #[test]
    fn test_factor_export_shape() {
        let model = sample_model();
        let mut out = Vec::new();
        model.write_p_factors(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), model.m() as usize);
        for line in lines {
            assert_eq!(line.split_whitespace().count(), model.k());
        }
    }
}
