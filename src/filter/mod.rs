use log::debug;

use crate::{
    error::{PdfError, PdfResult},
    objects::{Dictionary, Object},
    resolve::Resolve,
};

pub(crate) mod ascii;
pub(crate) mod flate;
pub(crate) mod lzw;
pub(crate) mod predictor;
pub(crate) mod run_length;

pub use predictor::PredictorKind;
use predictor::PredictorParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilterKind {
    AsciiHex,
    Ascii85,
    Lzw,
    Flate,
    RunLength,
    CcittFax,
    Jbig2,
    Dct,
    Jpx,
    Crypt,
}

impl FilterKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "ASCIIHexDecode" => FilterKind::AsciiHex,
            "ASCII85Decode" => FilterKind::Ascii85,
            "LZWDecode" => FilterKind::Lzw,
            "FlateDecode" => FilterKind::Flate,
            "RunLengthDecode" => FilterKind::RunLength,
            "CCITTFaxDecode" => FilterKind::CcittFax,
            "JBIG2Decode" => FilterKind::Jbig2,
            "DCTDecode" => FilterKind::Dct,
            "JPXDecode" => FilterKind::Jpx,
            "Crypt" => FilterKind::Crypt,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterKind::AsciiHex => "ASCIIHexDecode",
            FilterKind::Ascii85 => "ASCII85Decode",
            FilterKind::Lzw => "LZWDecode",
            FilterKind::Flate => "FlateDecode",
            FilterKind::RunLength => "RunLengthDecode",
            FilterKind::CcittFax => "CCITTFaxDecode",
            FilterKind::Jbig2 => "JBIG2Decode",
            FilterKind::Dct => "DCTDecode",
            FilterKind::Jpx => "JPXDecode",
            FilterKind::Crypt => "Crypt",
        }
    }
}

/// The /Filter entry as a list, treating a single name and a one-element
/// array identically.
fn filter_list(dict: &Dictionary, resolver: &mut dyn Resolve) -> PdfResult<Vec<FilterKind>> {
    let filters = match dict.get("Filter") {
        Some(obj) => match resolver.resolve(obj.clone())? {
            Object::Name(name) => vec![Object::Name(name)],
            Object::Array(arr) => arr,
            Object::Null => Vec::new(),
            obj => {
                anyhow::bail!(PdfError::Filter(format!(
                    "/Filter must be a name or array, found {}",
                    obj.kind()
                )));
            }
        },
        None => Vec::new(),
    };

    filters
        .into_iter()
        .map(|obj| {
            let name = resolver.assert_name(obj)?;

            FilterKind::from_name(name.as_str())
                .ok_or_else(|| PdfError::Filter(format!("unknown filter /{}", name)).into())
        })
        .collect()
}

/// The /DecodeParms entry aligned with the filter list.
fn parms_list(
    dict: &Dictionary,
    count: usize,
    resolver: &mut dyn Resolve,
) -> PdfResult<Vec<Option<Dictionary>>> {
    let mut parms = match dict.get("DecodeParms") {
        Some(obj) => match resolver.resolve(obj.clone())? {
            Object::Dictionary(parms) => vec![Some(parms)],
            Object::Array(arr) => arr
                .into_iter()
                .map(|obj| match resolver.resolve(obj)? {
                    Object::Dictionary(parms) => Ok(Some(parms)),
                    Object::Null => Ok(None),
                    obj => Err(PdfError::Filter(format!(
                        "invalid /DecodeParms entry of type {}",
                        obj.kind()
                    ))
                    .into()),
                })
                .collect::<PdfResult<Vec<_>>>()?,
            Object::Null => Vec::new(),
            obj => {
                anyhow::bail!(PdfError::Filter(format!(
                    "/DecodeParms must be a dictionary or array, found {}",
                    obj.kind()
                )));
            }
        },
        None => Vec::new(),
    };

    parms.resize(count, None);

    Ok(parms)
}

fn predictor_params(
    parms: Option<&Dictionary>,
    resolver: &mut dyn Resolve,
) -> PdfResult<PredictorParams> {
    let mut params = PredictorParams::default();

    if let Some(parms) = parms {
        if let Some(predictor) = parms.get_integer("Predictor", resolver)? {
            params.predictor = predictor;
        }
        if let Some(colors) = parms.get_integer("Colors", resolver)? {
            params.colors = usize::try_from(colors)
                .map_err(|_| PdfError::Filter(format!("invalid /Colors {}", colors)))?;
        }
        if let Some(bits) = parms.get_integer("BitsPerComponent", resolver)? {
            params.bits_per_component = usize::try_from(bits)
                .map_err(|_| PdfError::Filter(format!("invalid /BitsPerComponent {}", bits)))?;
        }
        if let Some(columns) = parms.get_integer("Columns", resolver)? {
            params.columns = usize::try_from(columns)
                .map_err(|_| PdfError::Filter(format!("invalid /Columns {}", columns)))?;
        }
    }

    Ok(params)
}

/// Run a stream's bytes through its declared filter chain.
///
/// CCITTFax/DCT/JBIG2/JPX deliver their raw bytes unchanged; consumers that
/// want pixels bring their own image decoders. /Crypt is a no-op here
/// because decryption happens before the filter chain runs.
pub(crate) fn decode_stream(
    data: &[u8],
    dict: &Dictionary,
    resolver: &mut dyn Resolve,
) -> PdfResult<Vec<u8>> {
    let filters = filter_list(dict, resolver)?;
    let parms = parms_list(dict, filters.len(), resolver)?;

    let mut data = data.to_vec();

    for (filter, parms) in filters.into_iter().zip(parms) {
        data = match filter {
            FilterKind::AsciiHex => ascii::decode_ascii_hex(&data)?,
            FilterKind::Ascii85 => ascii::decode_ascii_85(&data)?,
            FilterKind::Flate => {
                let params = predictor_params(parms.as_ref(), resolver)?;

                predictor::decode(flate::inflate(&data)?, &params)?
            }
            FilterKind::Lzw => {
                let params = predictor_params(parms.as_ref(), resolver)?;
                let early_change = match parms.as_ref() {
                    Some(parms) => parms.get_integer("EarlyChange", resolver)?.unwrap_or(1) != 0,
                    None => true,
                };

                predictor::decode(lzw::decode(&data, early_change)?, &params)?
            }
            FilterKind::RunLength => run_length::decode(&data)?,
            FilterKind::CcittFax | FilterKind::Jbig2 | FilterKind::Dct | FilterKind::Jpx => {
                debug!("passing /{} data through undecoded", filter.name());
                data
            }
            FilterKind::Crypt => data,
        };
    }

    Ok(data)
}

/// Whether the stream carries a /Crypt filter entry naming /Identity,
/// which exempts it from document encryption.
pub(crate) fn crypt_identity(dict: &Dictionary, resolver: &mut dyn Resolve) -> PdfResult<bool> {
    let filters = filter_list(dict, resolver)?;

    if !filters.contains(&FilterKind::Crypt) {
        return Ok(false);
    }

    let parms = parms_list(dict, filters.len(), resolver)?;

    for (filter, parms) in filters.into_iter().zip(parms) {
        if filter != FilterKind::Crypt {
            continue;
        }

        let crypt_name = match parms {
            Some(parms) => parms
                .get_name("Name", resolver)?
                .map(|name| name.as_str().to_owned())
                .unwrap_or_else(|| "Identity".to_owned()),
            None => "Identity".to_owned(),
        };

        if crypt_name != "Identity" {
            anyhow::bail!(PdfError::Crypto(format!(
                "unsupported crypt filter /{}",
                crypt_name
            )));
        }
    }

    Ok(true)
}

/// Encoding applied by the writer when a stream is produced.
///
/// Callers that already hold encoded bytes (a JPEG to embed, say) use
/// `None` and set /Filter themselves.
#[derive(Debug, Clone)]
pub enum StreamFilter {
    None,
    Flate(FlateParams),
}

impl StreamFilter {
    pub fn flate() -> Self {
        StreamFilter::Flate(FlateParams::default())
    }
}

#[derive(Debug, Clone)]
pub struct FlateParams {
    pub predictor: Option<PredictorKind>,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
}

impl Default for FlateParams {
    fn default() -> Self {
        Self {
            predictor: None,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
        }
    }
}

/// Encode stream bytes, recording /Filter and /DecodeParms in the dict.
pub(crate) fn encode_stream(
    data: &[u8],
    filter: &StreamFilter,
    dict: &mut Dictionary,
) -> PdfResult<Vec<u8>> {
    match filter {
        StreamFilter::None => Ok(data.to_vec()),
        StreamFilter::Flate(params) => {
            let mut data = data.to_vec();

            if let Some(kind) = params.predictor {
                let predictor_params = PredictorParams {
                    predictor: kind.decode_parms_value(),
                    colors: params.colors,
                    bits_per_component: params.bits_per_component,
                    columns: params.columns,
                };

                data = predictor::encode(&data, kind, &predictor_params)?;

                let mut parms = Dictionary::new();
                parms.insert("Predictor", kind.decode_parms_value());
                parms.insert("Colors", params.colors as i64);
                parms.insert("BitsPerComponent", params.bits_per_component as i64);
                parms.insert("Columns", params.columns as i64);
                dict.insert("DecodeParms", Object::Dictionary(parms));
            }

            dict.insert("Filter", Object::name("FlateDecode"));

            flate::deflate(&data)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resolve::NoResolve;

    #[test]
    fn single_name_and_single_element_array_agree() {
        let data = flate::deflate(b"some stream bytes").unwrap();

        let mut by_name = Dictionary::new();
        by_name.insert("Filter", Object::name("FlateDecode"));

        let mut by_array = Dictionary::new();
        by_array.insert("Filter", Object::Array(vec![Object::name("FlateDecode")]));

        assert_eq!(
            decode_stream(&data, &by_name, &mut NoResolve).unwrap(),
            decode_stream(&data, &by_array, &mut NoResolve).unwrap(),
        );
    }

    #[test]
    fn chained_filters_run_in_order() {
        let flated = flate::deflate(b"chained").unwrap();
        let mut hex: Vec<u8> = flated
            .iter()
            .flat_map(|b| format!("{:02X}", b).into_bytes())
            .collect();
        hex.push(b'>');

        let mut dict = Dictionary::new();
        dict.insert(
            "Filter",
            Object::Array(vec![
                Object::name("ASCIIHexDecode"),
                Object::name("FlateDecode"),
            ]),
        );

        assert_eq!(decode_stream(&hex, &dict, &mut NoResolve).unwrap(), b"chained");
    }

    #[test]
    fn unknown_filter_is_an_error() {
        let mut dict = Dictionary::new();
        dict.insert("Filter", Object::name("BogusDecode"));

        assert!(decode_stream(b"", &dict, &mut NoResolve).is_err());
    }

    #[test]
    fn encode_records_filter_entries() {
        let mut dict = Dictionary::new();
        let encoded = encode_stream(b"hello hello hello", &StreamFilter::flate(), &mut dict).unwrap();

        assert_eq!(dict.get("Filter"), Some(&Object::name("FlateDecode")));
        assert_eq!(
            decode_stream(&encoded, &dict, &mut NoResolve).unwrap(),
            b"hello hello hello"
        );
    }

    #[test]
    fn dct_passes_through() {
        let mut dict = Dictionary::new();
        dict.insert("Filter", Object::name("DCTDecode"));

        let jpeg_ish = [0xFF, 0xD8, 0xFF, 0xE0, 0x13, 0x37];
        assert_eq!(
            decode_stream(&jpeg_ish, &dict, &mut NoResolve).unwrap(),
            jpeg_ish
        );
    }
}
