//! Decoding of HID report descriptors.
//!
//! A report descriptor is a flat sequence of *short items*. Each item starts
//! with a one-byte prefix:
//!
//! ```text
//!   7   6   5   4   3   2   1   0
//! +---+---+---+---+---+---+---+---+
//! |      bTag     | bType | bSize |
//! +---+---+---+---+---+---+---+---+
//! ```
//!
//! followed by 0, 1, 2 or 4 little-endian operand bytes selected by `bSize`.
//! Collection and End Collection items open and close nesting scopes, which
//! are reflected in the indentation of the rendered trace.
//!
//! Long items (prefix `0xFE`) are not supported and fail the parse.

use std::fmt::{self, Display};

use log::warn;

/// Prefix byte announcing a long item.
pub const LONG_ITEM_PREFIX: u8 = 0xFE;

pub(crate) const TAG_MAIN_COLLECTION: u8 = 0xa;
pub(crate) const TAG_MAIN_END_COLLECTION: u8 = 0xc;

const INDENT: &str = "  ";

/// Operand byte length indexed by the 2-bit size code.
const OPERAND_LEN: [usize; 4] = [0, 1, 2, 4];

#[rustfmt::skip]
const MAIN_LABELS: [Option<&str>; 16] = [
    None, None, None, None, None, None, None, None,
    Some("Input"),                 // 0x8
    Some("Output"),                // 0x9
    Some("Collection"),            // 0xa
    Some("Feature"),               // 0xb
    Some("End Collection"),        // 0xc
    None, None, None,
];

#[rustfmt::skip]
const GLOBAL_LABELS: [Option<&str>; 16] = [
    Some("Usage Page"),            // 0x0
    Some("Logical Minimum"),       // 0x1
    Some("Logical Maximum"),       // 0x2
    Some("Physical Minimum"),      // 0x3
    Some("Physical Maximum"),      // 0x4
    Some("Unit Exponent"),         // 0x5
    Some("Unit"),                  // 0x6
    Some("Report Size"),           // 0x7
    Some("Report ID"),             // 0x8
    Some("Report Count"),          // 0x9
    Some("Push"),                  // 0xa
    Some("Pop"),                   // 0xb
    None, None, None, None,
];

#[rustfmt::skip]
const LOCAL_LABELS: [Option<&str>; 16] = [
    Some("Usage"),                 // 0x0
    Some("Usage Minimum"),         // 0x1
    Some("Usage Maximum"),         // 0x2
    Some("Designator Index"),      // 0x3
    Some("Designator Minimum"),    // 0x4
    Some("Designator Maximum"),    // 0x5
    None,
    Some("String Index"),          // 0x7
    Some("String Minimum"),        // 0x8
    Some("String Maximum"),        // 0x9
    Some("Delimiter"),             // 0xa
    None, None, None, None, None,
];

/// Change in nesting depth caused by an item: Collection opens, End
/// Collection closes.
fn collection_delta(item_type: ItemType, tag: u8) -> isize {
    match (item_type, tag) {
        (ItemType::Main, TAG_MAIN_COLLECTION) => 1,
        (ItemType::Main, TAG_MAIN_END_COLLECTION) => -1,
        _ => 0,
    }
}

/// Labels indexed by item type, then tag. The reserved type has no items.
const ITEM_LABELS: [[Option<&str>; 16]; 4] = [MAIN_LABELS, GLOBAL_LABELS, LOCAL_LABELS, [None; 16]];

/// Item class encoded in bits 2-3 of the prefix.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
pub enum ItemType {
    /// Input, Output, Feature, Collection and End Collection.
    Main = 0,

    /// Report-wide state such as sizes and ranges.
    Global = 1,

    /// Qualifiers applying to the next Main item.
    Local = 2,

    Reserved = 3,
}

impl ItemType {
    /// Decode from the two low bits of `bits`.
    pub fn from_bits(bits: u8) -> ItemType {
        match bits & 0x3 {
            0 => ItemType::Main,
            1 => ItemType::Global,
            2 => ItemType::Local,
            _ => ItemType::Reserved,
        }
    }
}

/// Number of operand bytes that follow a prefix with the given size code.
///
/// Only the two low bits of `size_code` are used.
pub fn operand_len(size_code: u8) -> usize {
    OPERAND_LEN[(size_code & 0x3) as usize]
}

/// Canonical name of the item with the given type and tag, if there is one.
pub fn item_label(item_type: ItemType, tag: u8) -> Option<&'static str> {
    ITEM_LABELS[item_type as usize]
        .get(tag as usize)
        .copied()
        .flatten()
}

/// A single short item found in a report descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    offset: usize,
    prefix: u8,
    operand: Option<u32>,
    label: &'static str,
    depth: usize,
}

impl Item {
    /// Byte offset of the prefix within the descriptor.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The raw prefix byte.
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// `bSize`: the 2-bit operand size code.
    pub fn size_code(&self) -> u8 {
        self.prefix & 0x3
    }

    /// `bType`
    pub fn item_type(&self) -> ItemType {
        ItemType::from_bits(self.prefix >> 2)
    }

    /// `bTag`
    pub fn tag(&self) -> u8 {
        (self.prefix >> 4) & 0xf
    }

    /// Operand value, or `None` for items with a zero-length operand.
    pub fn operand(&self) -> Option<u32> {
        self.operand
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Collection nesting depth this item is rendered at.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Total bytes occupied by the item, prefix included.
    pub fn encoded_len(&self) -> usize {
        1 + operand_len(self.size_code())
    }

    pub fn is_collection(&self) -> bool {
        collection_delta(self.item_type(), self.tag()) > 0
    }

    pub fn is_end_collection(&self) -> bool {
        collection_delta(self.item_type(), self.tag()) < 0
    }

    /// Encode the item back into its short item form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.prefix);
        let len = operand_len(self.size_code());
        buf.extend_from_slice(&self.operand.unwrap_or(0).to_le_bytes()[..len]);
        buf
    }
}

impl Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.depth {
            f.write_str(INDENT)?;
        }
        f.write_str(self.label)?;
        if let Some(operand) = self.operand {
            write!(f, "({operand:#x})")?;
        }
        Ok(())
    }
}

/// Error decoding a report descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// A long item prefix (`0xFE`) was found.
    LongItemUnsupported { offset: usize },

    /// The item type and tag do not name a known item.
    UnrecognizedItem {
        offset: usize,
        prefix: u8,
        item_type: ItemType,
        tag: u8,
    },

    /// The descriptor ends before the operand announced by the prefix.
    TruncatedOperand {
        offset: usize,
        prefix: u8,
        needed: usize,
        remaining: usize,
    },
}

impl ParseError {
    /// Byte offset of the prefix of the offending item.
    pub fn offset(&self) -> usize {
        match *self {
            ParseError::LongItemUnsupported { offset }
            | ParseError::UnrecognizedItem { offset, .. }
            | ParseError::TruncatedOperand { offset, .. } => offset,
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParseError::LongItemUnsupported { offset } => {
                write!(f, "HID report parser: long items are not implemented (offset {offset})")
            }
            ParseError::UnrecognizedItem {
                offset,
                prefix,
                item_type,
                tag,
            } => write!(
                f,
                "HID report parser: unrecognized item 0x{prefix:02x} at offset {offset} (type {item_type:?}, tag 0x{tag:x})"
            ),
            ParseError::TruncatedOperand {
                offset,
                prefix,
                needed,
                remaining,
            } => write!(
                f,
                "HID report parser: item 0x{prefix:02x} at offset {offset} needs {needed} operand bytes but {remaining} remain"
            ),
        }
    }
}

impl std::error::Error for ParseError {}

/// Iterator decoding the items of a report descriptor one at a time.
///
/// Yields `Err` at most once, after which it is exhausted.
#[derive(Clone)]
pub struct Items<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: isize,
    failed: bool,
}

impl<'a> Items<'a> {
    pub fn new(buf: &'a [u8]) -> Items<'a> {
        Items {
            buf,
            pos: 0,
            depth: 0,
            failed: false,
        }
    }

    /// Signed collection counter: Collections seen minus End Collections seen.
    pub fn balance(&self) -> isize {
        self.depth
    }

    fn decode(&mut self) -> Result<Item, ParseError> {
        let offset = self.pos;
        let prefix = self.buf[offset];
        if prefix == LONG_ITEM_PREFIX {
            return Err(ParseError::LongItemUnsupported { offset });
        }

        let size_code = prefix & 0x3;
        let item_type = ItemType::from_bits(prefix >> 2);
        let tag = (prefix >> 4) & 0xf;

        let needed = operand_len(size_code);
        let operand_bytes = self
            .buf
            .get(offset + 1..offset + 1 + needed)
            .ok_or(ParseError::TruncatedOperand {
                offset,
                prefix,
                needed,
                remaining: self.buf.len() - offset - 1,
            })?;

        let label = item_label(item_type, tag).ok_or(ParseError::UnrecognizedItem {
            offset,
            prefix,
            item_type,
            tag,
        })?;

        let depth = match collection_delta(item_type, tag) {
            1 => {
                self.depth += 1;
                self.depth - 1
            }
            -1 => {
                self.depth -= 1;
                if self.depth < 0 {
                    warn!("End Collection at offset {offset} has no matching Collection");
                }
                self.depth
            }
            _ => self.depth,
        };

        let operand = (needed > 0).then(|| {
            operand_bytes
                .iter()
                .rev()
                .fold(0u32, |acc, &b| (acc << 8) | b as u32)
        });

        self.pos = offset + 1 + needed;

        Ok(Item {
            offset,
            prefix,
            operand,
            label,
            depth: depth.max(0) as usize,
        })
    }
}

impl<'a> Iterator for Items<'a> {
    type Item = Result<Item, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }

        let res = self.decode();
        self.failed = res.is_err();
        Some(res)
    }
}

impl std::iter::FusedIterator for Items<'_> {}

/// A fully decoded report descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ReportDescriptor {
    items: Vec<Item>,
    balance: isize,
}

impl ReportDescriptor {
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Collections opened minus collections closed.
    ///
    /// Zero for a well-formed descriptor. The parser does not reject
    /// unbalanced descriptors; this lets callers detect them.
    pub fn balance(&self) -> isize {
        self.balance
    }
}

/// Renders the trace: one item per line, each line terminated by `\n`.
impl Display for ReportDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            writeln!(f, "{item}")?;
        }
        Ok(())
    }
}

/// Decode every item of `buf`.
///
/// Any error aborts the whole parse; no partial result is returned.
pub fn parse(buf: &[u8]) -> Result<ReportDescriptor, ParseError> {
    let mut iter = Items::new(buf);
    let mut items = Vec::new();
    for item in iter.by_ref() {
        items.push(item?);
    }

    if iter.balance() > 0 {
        warn!("{} collections left open at end of report descriptor", iter.balance());
    }

    Ok(ReportDescriptor {
        items,
        balance: iter.balance(),
    })
}

/// Decode `buf` and render it as a text trace.
pub fn render(buf: &[u8]) -> Result<String, ParseError> {
    parse(buf).map(|rd| rd.to_string())
}

/// Make public when fuzzing
#[cfg(fuzzing)]
pub fn fuzz_parse(buf: &[u8]) -> Result<ReportDescriptor, ParseError> {
    parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let rd = parse(&[]).unwrap();
        assert!(rd.is_empty());
        assert_eq!(rd.balance(), 0);
        assert_eq!(render(&[]).unwrap(), "");
    }

    #[test]
    fn test_usage_page() {
        assert_eq!(render(&[0x05, 0x01]).unwrap(), "Usage Page(0x1)\n");
    }

    #[test]
    fn test_collection_nesting() {
        let rd = parse(&[0xA1, 0x01, 0x81, 0x01, 0xC0]).unwrap();
        let depths: Vec<_> = rd.items().iter().map(|i| i.depth()).collect();
        assert_eq!(depths, [0, 1, 0]);
        assert_eq!(rd.balance(), 0);

        let kinds: Vec<_> = rd
            .items()
            .iter()
            .map(|i| (i.is_collection(), i.is_end_collection()))
            .collect();
        assert_eq!(kinds, [(true, false), (false, false), (false, true)]);
        assert_eq!(
            rd.to_string(),
            "Collection(0x1)\n  Input(0x1)\nEnd Collection\n"
        );
    }

    #[test]
    fn test_long_item() {
        assert_eq!(
            parse(&[0xFE, 0x02, 0x10, 0xAA, 0xBB]),
            Err(ParseError::LongItemUnsupported { offset: 0 })
        );

        let mut items = Items::new(&[0xFE, 0x05, 0x01]);
        assert!(matches!(
            items.next(),
            Some(Err(ParseError::LongItemUnsupported { offset: 0 }))
        ));
        assert!(items.next().is_none());
    }

    #[test]
    fn test_long_item_after_valid_items() {
        let err = parse(&[0x05, 0x01, 0xFE]).unwrap_err();
        assert_eq!(err, ParseError::LongItemUnsupported { offset: 2 });
        assert_eq!(err.offset(), 2);
    }

    #[test]
    fn test_reserved_type() {
        assert_eq!(
            parse(&[0x0C]),
            Err(ParseError::UnrecognizedItem {
                offset: 0,
                prefix: 0x0C,
                item_type: ItemType::Reserved,
                tag: 0,
            })
        );
    }

    #[test]
    fn test_unrecognized_tag() {
        // Local tag 0x6 is a gap in the table
        let err = parse(&[0x09, 0x01, 0x69, 0x00]).unwrap_err();
        assert_eq!(
            err,
            ParseError::UnrecognizedItem {
                offset: 2,
                prefix: 0x69,
                item_type: ItemType::Local,
                tag: 0x6,
            }
        );
        assert!(err.to_string().contains("offset 2"));
    }

    #[test]
    fn test_truncated_operand() {
        assert_eq!(
            parse(&[0x01]),
            Err(ParseError::TruncatedOperand {
                offset: 0,
                prefix: 0x01,
                needed: 1,
                remaining: 0,
            })
        );

        assert_eq!(
            parse(&[0x05, 0x01, 0x27, 0xFF, 0x00]),
            Err(ParseError::TruncatedOperand {
                offset: 2,
                prefix: 0x27,
                needed: 4,
                remaining: 2,
            })
        );
    }

    #[test]
    fn test_operand_little_endian() {
        let rd = parse(&[0x06, 0xD0, 0xF1, 0x27, 0x78, 0x56, 0x34, 0x12]).unwrap();
        assert_eq!(rd.items()[0].operand(), Some(0xF1D0));
        assert_eq!(rd.items()[1].operand(), Some(0x1234_5678));
        assert_eq!(
            rd.to_string(),
            "Usage Page(0xf1d0)\nLogical Maximum(0x12345678)\n"
        );
    }

    #[test]
    fn test_zero_operand_rendered() {
        // A 1-byte operand of zero is still an operand
        assert_eq!(render(&[0x15, 0x00]).unwrap(), "Logical Minimum(0x0)\n");
        assert_eq!(render(&[0xC0]).unwrap(), "End Collection\n");
    }

    #[test]
    fn test_unmatched_end_collection() {
        let rd = parse(&[0xC0, 0x05, 0x01]).unwrap();
        assert_eq!(rd.balance(), -1);
        assert_eq!(rd.items()[0].depth(), 0);
        assert_eq!(rd.to_string(), "End Collection\nUsage Page(0x1)\n");
    }

    #[test]
    fn test_unclosed_collection() {
        let rd = parse(&[0xA1, 0x00, 0xA1, 0x02, 0x09, 0x30]).unwrap();
        assert_eq!(rd.balance(), 2);
        assert_eq!(
            rd.to_string(),
            "Collection(0x0)\n  Collection(0x2)\n    Usage(0x30)\n"
        );
    }

    #[test]
    fn test_item_fields() {
        let rd = parse(&[0x75, 0x08, 0x95, 0x40]).unwrap();
        let size = &rd.items()[0];
        assert_eq!(size.offset(), 0);
        assert_eq!(size.prefix(), 0x75);
        assert_eq!(size.size_code(), 1);
        assert_eq!(size.item_type(), ItemType::Global);
        assert_eq!(size.tag(), 0x7);
        assert_eq!(size.label(), "Report Size");
        assert_eq!(size.encoded_len(), 2);
        assert_eq!(rd.items()[1].offset(), 2);
        assert_eq!(rd.items()[1].label(), "Report Count");
    }

    #[test]
    fn test_tables() {
        assert_eq!(operand_len(0), 0);
        assert_eq!(operand_len(1), 1);
        assert_eq!(operand_len(2), 2);
        assert_eq!(operand_len(3), 4);

        assert_eq!(item_label(ItemType::Main, 0x8), Some("Input"));
        assert_eq!(item_label(ItemType::Main, 0x9), Some("Output"));
        assert_eq!(item_label(ItemType::Main, 0xa), Some("Collection"));
        assert_eq!(item_label(ItemType::Main, 0xb), Some("Feature"));
        assert_eq!(item_label(ItemType::Main, 0xc), Some("End Collection"));
        assert_eq!(item_label(ItemType::Main, 0x0), None);
        assert_eq!(item_label(ItemType::Global, 0x0), Some("Usage Page"));
        assert_eq!(item_label(ItemType::Global, 0x9), Some("Report Count"));
        assert_eq!(item_label(ItemType::Global, 0xa), Some("Push"));
        assert_eq!(item_label(ItemType::Global, 0xb), Some("Pop"));
        assert_eq!(item_label(ItemType::Global, 0xc), None);
        assert_eq!(item_label(ItemType::Local, 0x5), Some("Designator Maximum"));
        assert_eq!(item_label(ItemType::Local, 0x6), None);
        assert_eq!(item_label(ItemType::Local, 0x7), Some("String Index"));
        assert_eq!(item_label(ItemType::Local, 0xa), Some("Delimiter"));
        assert_eq!(item_label(ItemType::Local, 0xb), None);
        assert!((0..16).all(|tag| item_label(ItemType::Reserved, tag).is_none()));
        assert_eq!(item_label(ItemType::Global, 0x20), None);

        let known = [ItemType::Main, ItemType::Global, ItemType::Local, ItemType::Reserved]
            .into_iter()
            .flat_map(|t| (0..16).filter_map(move |tag| item_label(t, tag)))
            .count();
        assert_eq!(known, 5 + 12 + 10);
    }

    fn encode(items: &[(ItemType, u8, u8, u32)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for &(item_type, tag, size_code, operand) in items {
            buf.push((tag << 4) | ((item_type as u8) << 2) | size_code);
            buf.extend_from_slice(&operand.to_le_bytes()[..operand_len(size_code)]);
        }
        buf
    }

    #[test]
    fn test_reencode() {
        let synthetic = [
            (ItemType::Global, 0x0, 1, 0x01),
            (ItemType::Local, 0x0, 1, 0x02),
            (ItemType::Main, 0xa, 1, 0x01),
            (ItemType::Local, 0x0, 1, 0x01),
            (ItemType::Main, 0xa, 1, 0x00),
            (ItemType::Global, 0x1, 2, 0x8001),
            (ItemType::Global, 0x2, 3, 0x7fff_ffff),
            (ItemType::Main, 0x8, 1, 0x06),
            (ItemType::Main, 0xc, 0, 0),
            (ItemType::Global, 0xa, 0, 0),
            (ItemType::Main, 0xc, 0, 0),
        ];
        let buf = encode(&synthetic);
        let rd = parse(&buf).unwrap();

        assert_eq!(rd.items().len(), synthetic.len());
        for (item, &(item_type, tag, size_code, operand)) in rd.items().iter().zip(&synthetic) {
            assert_eq!(item.item_type(), item_type);
            assert_eq!(item.tag(), tag);
            assert_eq!(item.size_code(), size_code);
            assert_eq!(item.operand(), (size_code > 0).then_some(operand));
        }

        let depths: Vec<_> = rd.items().iter().map(|i| i.depth()).collect();
        assert_eq!(depths, [0, 0, 0, 1, 1, 2, 2, 2, 1, 1, 0]);

        let reencoded: Vec<u8> = rd.items().iter().flat_map(|i| i.to_bytes()).collect();
        assert_eq!(reencoded, buf);
        assert_eq!(parse(&reencoded).unwrap(), rd);
    }

    #[test]
    fn test_items_consume_exactly() {
        let buf = encode(&[
            (ItemType::Global, 0x8, 0, 0),
            (ItemType::Global, 0x8, 1, 0xAB),
            (ItemType::Global, 0x8, 2, 0xABCD),
            (ItemType::Global, 0x8, 3, 0xDEAD_BEEF),
        ]);
        let offsets: Vec<_> = Items::new(&buf).map(|i| i.unwrap().offset()).collect();
        assert_eq!(offsets, [0, 1, 3, 6]);
        let total: usize = parse(&buf).unwrap().items().iter().map(Item::encoded_len).sum();
        assert_eq!(total, buf.len());
    }

    #[test]
    #[rustfmt::skip]
    fn test_fido_descriptor() {
        let rd = parse(&[
            0x06, 0xD0, 0xF1,
            0x09, 0x01,
            0xA1, 0x01,
            0x09, 0x20,
            0x15, 0x00,
            0x26, 0xFF, 0x00,
            0x75, 0x08,
            0x95, 0x40,
            0x81, 0x02,
            0x09, 0x21,
            0x15, 0x00,
            0x26, 0xFF, 0x00,
            0x75, 0x08,
            0x95, 0x40,
            0x91, 0x02,
            0xC0,
        ]).unwrap();

        assert_eq!(rd.to_string(), concat!(
            "Usage Page(0xf1d0)\n",
            "Usage(0x1)\n",
            "Collection(0x1)\n",
            "  Usage(0x20)\n",
            "  Logical Minimum(0x0)\n",
            "  Logical Maximum(0xff)\n",
            "  Report Size(0x8)\n",
            "  Report Count(0x40)\n",
            "  Input(0x2)\n",
            "  Usage(0x21)\n",
            "  Logical Minimum(0x0)\n",
            "  Logical Maximum(0xff)\n",
            "  Report Size(0x8)\n",
            "  Report Count(0x40)\n",
            "  Output(0x2)\n",
            "End Collection\n",
        ));
    }
}
