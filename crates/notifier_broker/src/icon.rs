use crate::wire::Value;

/// One size variant of an item's icon in the StatusNotifierItem [Icon format]: `width * height`
/// pixels of ARGB32 in network byte order.
///
/// [Icon format]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/Icons/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pixmap {
    pub width: i32,
    pub height: i32,
    pub data: Vec<u8>,
}

impl Pixmap {
    pub fn min_dimension(&self) -> i32 {
        self.width.min(self.height)
    }

    /// Decode one `(iiay)` entry. Entries with negative dimensions, or with fewer bytes than their
    /// dimensions call for, are rejected.
    pub fn from_wire(value: &Value) -> Option<Pixmap> {
        let fields = value.fields();
        let width = fields.first()?.as_i32()?;
        let height = fields.get(1)?.as_i32()?;
        let data = fields.get(2).and_then(Value::as_bytes).map(|b| b.into_owned()).unwrap_or_default();
        if byte_len(width, height)? > data.len() {
            return None;
        }
        Some(Pixmap { width, height, data })
    }
}

/// Size of a `width * height` ARGB32 image, or `None` for negative or unrepresentable sizes.
fn byte_len(width: i32, height: i32) -> Option<usize> {
    let width = usize::try_from(width).ok()?;
    let height = usize::try_from(height).ok()?;
    width.checked_mul(height)?.checked_mul(4)
}

/// Decode an `a(iiay)` reply, dropping entries that don't have the right shape.
pub fn pixmaps_from_wire(value: &Value) -> Vec<Pixmap> {
    value
        .elements()
        .iter()
        .filter_map(|entry| {
            let pixmap = Pixmap::from_wire(entry);
            if pixmap.is_none() {
                log::debug!("skipping malformed pixmap entry {:?}", entry);
            }
            pixmap
        })
        .collect()
}

/// From a list of pixmaps, pick the most appropriately sized one.
///
/// Among the variants whose smaller side is at least `size`, the one with the smallest such side
/// wins. If none is big enough, the one with the largest smaller side wins.
///
/// This function returns None if and only if no pixmaps are provided.
pub fn select_pixmap(pixmaps: Vec<Pixmap>, size: i32) -> Option<Pixmap> {
    pixmaps.into_iter().rev().max_by(|p1, p2| {
        let m1 = p1.min_dimension();
        let m2 = p2.min_dimension();
        match (m1 >= size, m2 >= size) {
            (true, true) => m2.cmp(&m1),
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => m1.cmp(&m2),
        }
    })
}

/// A decoded icon, in the RGBA byte order the renderer expects (as gdk-pixbuf takes it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelSurface {
    pub width: i32,
    pub height: i32,
    pub data: Vec<u8>,
}

impl PixelSurface {
    pub fn stride(&self) -> i32 {
        self.width.saturating_mul(4)
    }
}

impl From<Pixmap> for PixelSurface {
    fn from(pixmap: Pixmap) -> Self {
        let Pixmap { mut width, mut height, mut data } = pixmap;
        // short payloads are padded with transparent pixels, long ones truncated
        match byte_len(width, height) {
            Some(len) => data.resize(len, 0),
            None => {
                (width, height) = (0, 0);
                data.clear();
            }
        }

        // We need to convert data from ARGB32 to RGBA32.
        for chunk in data.chunks_exact_mut(4) {
            chunk.rotate_left(1);
        }

        PixelSurface { width, height, data }
    }
}

/// Value of an item's `ToolTip` property.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolTip {
    pub icon_name: String,
    pub icon_pixmaps: Vec<Pixmap>,
    pub title: String,
    pub text: String,
}

impl ToolTip {
    /// Decode a `(sa(iiay)ss)` reply. Missing or mistyped fields are left empty, and the pixmaps
    /// are read in full so a trailing field is never taken from the middle of the image data.
    pub fn from_wire(value: &Value) -> ToolTip {
        let fields = value.fields();
        let string_at = |i: usize| fields.get(i).and_then(Value::as_str).unwrap_or_default().to_owned();
        ToolTip {
            icon_name: string_at(0),
            icon_pixmaps: fields.get(1).map(pixmaps_from_wire).unwrap_or_default(),
            title: string_at(2),
            text: string_at(3),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.text.is_empty()
    }
}

/// Where an item's [dbusmenu](https://github.com/AyatanaIndicators/libdbusmenu) lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuRef {
    pub destination: String,
    pub path: String,
}

/// Last known presentation of an item. Always refetched, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IconState {
    /// Themed icon name. Empty means the pixmap should be used.
    pub icon_name: String,
    pub pixmaps: Vec<Pixmap>,
    pub tooltip: Option<ToolTip>,
    pub menu: Option<MenuRef>,
    pub title: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn square(size: i32) -> Pixmap {
        Pixmap { width: size, height: size, data: vec![0; (size * size * 4) as usize] }
    }

    fn sizes(pixmap: Option<Pixmap>) -> Option<(i32, i32)> {
        pixmap.map(|p| (p.width, p.height))
    }

    #[test]
    fn test_select_closest_above() {
        let pixmaps = vec![square(16), square(32), square(48)];
        assert_eq!(sizes(select_pixmap(pixmaps.clone(), 24)), Some((32, 32)));
        assert_eq!(sizes(select_pixmap(pixmaps.clone(), 32)), Some((32, 32)));
        assert_eq!(sizes(select_pixmap(pixmaps.clone(), 16)), Some((16, 16)));
        assert_eq!(sizes(select_pixmap(pixmaps, 64)), Some((48, 48)));
    }

    #[test]
    fn test_select_uses_smaller_side() {
        let wide = Pixmap { width: 64, height: 20, data: vec![] };
        let pixmaps = vec![wide, square(22)];
        assert_eq!(sizes(select_pixmap(pixmaps, 21)), Some((22, 22)));
    }

    #[test]
    fn test_select_prefers_first_of_equal_fits() {
        let a = Pixmap { width: 32, height: 32, data: vec![1] };
        let b = Pixmap { width: 32, height: 32, data: vec![2] };
        assert_eq!(select_pixmap(vec![a.clone(), b], 24), Some(a));
        assert_eq!(select_pixmap(vec![], 24), None);
    }

    #[test]
    fn test_argb_is_repacked_to_rgba() {
        let pixmap = Pixmap { width: 2, height: 1, data: vec![0xff, 0x10, 0x20, 0x30, 0x80, 0x01, 0x02, 0x03] };
        let surface = PixelSurface::from(pixmap);
        assert_eq!(surface.data, vec![0x10, 0x20, 0x30, 0xff, 0x01, 0x02, 0x03, 0x80]);
        assert_eq!(surface.stride(), 8);
    }

    #[test]
    fn test_short_pixmap_is_padded() {
        let pixmap = Pixmap { width: 2, height: 2, data: vec![0xff, 1, 2, 3] };
        let surface = PixelSurface::from(pixmap);
        assert_eq!(surface.data.len(), 16);
        assert_eq!(&surface.data[..4], &[1, 2, 3, 0xff]);
        assert!(surface.data[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_tooltip_with_empty_pixmap_payload() {
        let reply = Value::Struct(vec![
            Value::from("icon"),
            Value::Array(vec![Value::Struct(vec![Value::I32(0), Value::I32(0), Value::Bytes(vec![])])]),
            Value::from("Title"),
            Value::from("Some text"),
        ]);
        let tooltip = ToolTip::from_wire(&reply);
        assert_eq!(tooltip.title, "Title");
        assert_eq!(tooltip.text, "Some text");
        assert_eq!(tooltip.icon_pixmaps, vec![Pixmap { width: 0, height: 0, data: vec![] }]);
    }

    #[test]
    fn test_tooltip_partial_decode() {
        let reply = Value::Struct(vec![Value::from("icon"), Value::I32(5), Value::from("Title")]);
        let tooltip = ToolTip::from_wire(&reply);
        assert_eq!(tooltip.title, "Title");
        assert_eq!(tooltip.text, "");
        assert!(tooltip.icon_pixmaps.is_empty());

        assert!(ToolTip::from_wire(&Value::from("nonsense")).is_empty());
    }

    #[test]
    fn test_malformed_pixmap_entries_are_skipped() {
        let reply = Value::Array(vec![
            Value::Struct(vec![Value::I32(-1), Value::I32(4), Value::Bytes(vec![])]),
            Value::from("garbage"),
            Value::Struct(vec![Value::I32(1), Value::I32(1), Value::Bytes(vec![1, 2, 3, 4])]),
        ]);
        assert_eq!(pixmaps_from_wire(&reply), vec![Pixmap { width: 1, height: 1, data: vec![1, 2, 3, 4] }]);
    }

    #[test]
    fn test_oversized_pixmap_entries_are_skipped() {
        let entry = |w: i32, h: i32| Value::Struct(vec![Value::I32(w), Value::I32(h), Value::Bytes(vec![0xff, 1, 2, 3])]);
        let reply = Value::Array(vec![entry(i32::MAX, i32::MAX), entry(60000, 60000), entry(2, 1)]);
        assert_eq!(pixmaps_from_wire(&reply), vec![]);
        assert_eq!(select_pixmap(pixmaps_from_wire(&reply), 24), None);

        let reply = Value::Array(vec![entry(i32::MAX, i32::MAX), entry(1, 1)]);
        let surface = select_pixmap(pixmaps_from_wire(&reply), 24).map(PixelSurface::from);
        assert_eq!(surface, Some(PixelSurface { width: 1, height: 1, data: vec![1, 2, 3, 0xff] }));
    }

    #[test]
    fn test_unrepresentable_surface_is_empty() {
        let surface = PixelSurface::from(Pixmap { width: i32::MAX, height: i32::MAX, data: vec![0xff, 1, 2, 3] });
        assert_eq!(surface, PixelSurface { width: 0, height: 0, data: vec![] });
        assert_eq!(PixelSurface { width: i32::MAX, height: 1, data: vec![] }.stride(), i32::MAX);
    }
}
