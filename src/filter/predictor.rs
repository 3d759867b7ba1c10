use std::cmp::min;

use crate::error::{PdfError, PdfResult};

/// PNG row filter selected by the writer.
///
/// `Auto` re-picks per row, choosing the filter whose output minimizes the
/// sum of absolute signed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorKind {
    None,
    Sub,
    Up,
    Average,
    Paeth,
    Auto,
}

impl PredictorKind {
    /// The value written under /DecodeParms /Predictor.
    pub(crate) fn decode_parms_value(self) -> i64 {
        match self {
            PredictorKind::None => 10,
            PredictorKind::Sub => 11,
            PredictorKind::Up => 12,
            PredictorKind::Average => 13,
            PredictorKind::Paeth => 14,
            PredictorKind::Auto => 15,
        }
    }
}

/// Decode-side parameters taken from /DecodeParms.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PredictorParams {
    pub predictor: i64,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
        }
    }
}

impl PredictorParams {
    pub fn bytes_per_pixel(&self) -> usize {
        ((self.colors * self.bits_per_component + 7) / 8).max(1)
    }

    pub fn bytes_per_row(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component + 7) / 8
    }
}

pub(crate) fn decode(data: Vec<u8>, params: &PredictorParams) -> PdfResult<Vec<u8>> {
    match params.predictor {
        1 => Ok(data),
        2 => decode_tiff(data, params),
        10..=15 => decode_png(&data, params.bytes_per_row(), params.bytes_per_pixel()),
        n => Err(PdfError::Filter(format!("unsupported predictor {}", n)).into()),
    }
}

/// TIFF horizontal differencing. Only whole-byte components occur in
/// practice; sub-byte layouts are rejected rather than mis-decoded.
fn decode_tiff(mut data: Vec<u8>, params: &PredictorParams) -> PdfResult<Vec<u8>> {
    if params.bits_per_component % 8 != 0 {
        anyhow::bail!(PdfError::Filter(format!(
            "TIFF predictor with {} bits per component",
            params.bits_per_component
        )));
    }

    let bpp = params.bytes_per_pixel();
    let bytes_per_row = params.bytes_per_row();

    for row_start in (0..data.len()).step_by(bytes_per_row.max(1)) {
        let row_end = min(row_start + bytes_per_row, data.len());

        for idx in (row_start + bpp)..row_end {
            data[idx] = data[idx].wrapping_add(data[idx - bpp]);
        }
    }

    Ok(data)
}

fn decode_png(data: &[u8], bytes_per_row: usize, bpp: usize) -> PdfResult<Vec<u8>> {
    if bytes_per_row == 0 || data.len() % (bytes_per_row + 1) != 0 {
        anyhow::bail!(PdfError::Filter(format!(
            "predictor input of {} bytes does not divide into {}-byte rows",
            data.len(),
            bytes_per_row + 1
        )));
    }

    let mut out = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; bytes_per_row];

    for chunk in data.chunks_exact(bytes_per_row + 1) {
        let tag = chunk[0];
        let mut row = chunk[1..].to_vec();

        match tag {
            0 => {}
            1 => {
                for idx in bpp..row.len() {
                    row[idx] = row[idx].wrapping_add(row[idx - bpp]);
                }
            }
            2 => {
                for idx in 0..row.len() {
                    row[idx] = row[idx].wrapping_add(prev_row[idx]);
                }
            }
            3 => {
                for idx in 0..row.len() {
                    let left = if idx >= bpp { row[idx - bpp] } else { 0 };
                    let up = prev_row[idx];
                    let avg = ((u16::from(left) + u16::from(up)) / 2) as u8;
                    row[idx] = row[idx].wrapping_add(avg);
                }
            }
            4 => {
                for idx in 0..row.len() {
                    let left = if idx >= bpp { row[idx - bpp] } else { 0 };
                    let up = prev_row[idx];
                    let up_left = if idx >= bpp { prev_row[idx - bpp] } else { 0 };
                    let p = paeth_predictor(
                        i16::from(left),
                        i16::from(up),
                        i16::from(up_left),
                    );
                    row[idx] = row[idx].wrapping_add(p);
                }
            }
            tag => {
                anyhow::bail!(PdfError::Filter(format!("unknown PNG filter type {}", tag)));
            }
        }

        out.extend_from_slice(&row);
        prev_row = row;
    }

    Ok(out)
}

pub(crate) fn encode(
    data: &[u8],
    kind: PredictorKind,
    params: &PredictorParams,
) -> PdfResult<Vec<u8>> {
    let bytes_per_row = params.bytes_per_row();
    let bpp = params.bytes_per_pixel();

    if bytes_per_row == 0 || data.len() % bytes_per_row != 0 {
        anyhow::bail!(PdfError::Filter(format!(
            "predictor input of {} bytes does not divide into {}-byte rows",
            data.len(),
            bytes_per_row
        )));
    }

    let mut out = Vec::with_capacity(data.len() + data.len() / bytes_per_row);
    let mut prev_row = vec![0u8; bytes_per_row];

    for row in data.chunks_exact(bytes_per_row) {
        let tag = match kind {
            PredictorKind::None => 0,
            PredictorKind::Sub => 1,
            PredictorKind::Up => 2,
            PredictorKind::Average => 3,
            PredictorKind::Paeth => 4,
            PredictorKind::Auto => best_filter_for_row(row, &prev_row, bpp),
        };

        out.push(tag);
        out.extend_from_slice(&filter_row(tag, row, &prev_row, bpp));

        prev_row = row.to_vec();
    }

    Ok(out)
}

fn filter_row(tag: u8, row: &[u8], prev_row: &[u8], bpp: usize) -> Vec<u8> {
    let mut filtered = Vec::with_capacity(row.len());

    for idx in 0..row.len() {
        let left = if idx >= bpp { row[idx - bpp] } else { 0 };
        let up = prev_row[idx];
        let up_left = if idx >= bpp { prev_row[idx - bpp] } else { 0 };

        let predicted = match tag {
            0 => 0,
            1 => left,
            2 => up,
            3 => ((u16::from(left) + u16::from(up)) / 2) as u8,
            4 => paeth_predictor(i16::from(left), i16::from(up), i16::from(up_left)),
            _ => unreachable!(),
        };

        filtered.push(row[idx].wrapping_sub(predicted));
    }

    filtered
}

/// Sum of absolute signed filtered bytes; the standard PNG heuristic.
fn filter_cost(filtered: &[u8]) -> u64 {
    filtered
        .iter()
        .map(|&b| u64::from((b as i8).unsigned_abs()))
        .sum()
}

fn best_filter_for_row(row: &[u8], prev_row: &[u8], bpp: usize) -> u8 {
    let mut best_tag = 0;
    let mut best_cost = u64::MAX;

    for tag in 0..=4 {
        let cost = filter_cost(&filter_row(tag, row, prev_row, bpp));

        if cost < best_cost {
            best_cost = cost;
            best_tag = tag;
        }
    }

    best_tag
}

fn paeth_predictor(a: i16, b: i16, c: i16) -> u8 {
    let p = a + b - c;
    let pa = (p - a).abs();
    let pb = (p - b).abs();
    let pc = (p - c).abs();

    match min(min(pa, pb), pc) {
        // order here for ties is important
        diff if diff == pa => a as u8,
        diff if diff == pb => b as u8,
        diff if diff == pc => c as u8,
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rgb_gradient(width: usize, height: usize) -> Vec<u8> {
        let mut image = Vec::with_capacity(width * height * 3);

        for y in 0..height {
            for x in 0..width {
                image.push((x * 255 / width.max(1)) as u8);
                image.push((y * 255 / height.max(1)) as u8);
                image.push(((x + y) % 256) as u8);
            }
        }

        image
    }

    fn rgb_params(width: usize) -> PredictorParams {
        PredictorParams {
            predictor: 15,
            colors: 3,
            bits_per_component: 8,
            columns: width,
        }
    }

    #[test]
    fn every_filter_round_trips() {
        let image = rgb_gradient(32, 32);
        let params = rgb_params(32);

        for kind in [
            PredictorKind::None,
            PredictorKind::Sub,
            PredictorKind::Up,
            PredictorKind::Average,
            PredictorKind::Paeth,
            PredictorKind::Auto,
        ] {
            let encoded = encode(&image, kind, &params).unwrap();
            let decoded = decode(encoded, &params).unwrap();
            assert_eq!(decoded, image, "{:?} did not round trip", kind);
        }
    }

    #[test]
    fn auto_picks_the_minimizer_per_row() {
        let image = rgb_gradient(64, 64);
        let params = rgb_params(64);
        let bpr = params.bytes_per_row();
        let bpp = params.bytes_per_pixel();

        let encoded = encode(&image, PredictorKind::Auto, &params).unwrap();

        let mut prev_row = vec![0u8; bpr];
        for (encoded_row, raw_row) in encoded.chunks_exact(bpr + 1).zip(image.chunks_exact(bpr)) {
            let chosen = encoded_row[0];
            let chosen_cost = filter_cost(&encoded_row[1..]);

            for tag in 0..=4 {
                let cost = filter_cost(&filter_row(tag, raw_row, &prev_row, bpp));
                assert!(
                    chosen_cost <= cost,
                    "row chose {} (cost {}) but {} costs {}",
                    chosen,
                    chosen_cost,
                    tag,
                    cost
                );
            }

            prev_row = raw_row.to_vec();
        }
    }

    #[test]
    fn tiff_predictor_round_trips_by_construction() {
        // encode side only emits PNG filters, so exercise TIFF decode
        // against a hand-differenced row
        let params = PredictorParams {
            predictor: 2,
            colors: 1,
            bits_per_component: 8,
            columns: 4,
        };

        let decoded = decode(vec![10, 5, 5, 5, 1, 255, 0, 2], &params).unwrap();
        assert_eq!(decoded, vec![10, 15, 20, 25, 1, 0, 0, 2]);
    }

    #[test]
    fn sixteen_bit_components() {
        let params = PredictorParams {
            predictor: 15,
            colors: 1,
            bits_per_component: 16,
            columns: 8,
        };

        let image: Vec<u8> = (0..64u16).flat_map(|n| (n * 321).to_be_bytes()).collect();
        let encoded = encode(&image, PredictorKind::Paeth, &params).unwrap();
        assert_eq!(decode(encoded, &params).unwrap(), image);
    }
}
