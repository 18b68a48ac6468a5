use roaring::RoaringBitmap;

/// The result of evaluating one operator: either a bitmap the operator
/// computed (owned, free to mutate) or a reference into a stored index
/// bitmap (borrowed, must be cloned before mutating).
///
/// The split lets index scans avoid copying while combinators mutate
/// their first input in place.
#[derive(Debug)]
pub enum OperatorResult<'a> {
    Owned(RoaringBitmap),
    Borrowed(&'a RoaringBitmap),
}

impl<'a> OperatorResult<'a> {
    pub fn as_ref(&self) -> &RoaringBitmap {
        match self {
            OperatorResult::Owned(bitmap) => bitmap,
            OperatorResult::Borrowed(bitmap) => bitmap,
        }
    }

    pub fn cardinality(&self) -> u64 {
        self.as_ref().len()
    }

    /// Take the bitmap, cloning only when it is borrowed.
    pub fn into_bitmap(self) -> RoaringBitmap {
        match self {
            OperatorResult::Owned(bitmap) => bitmap,
            OperatorResult::Borrowed(bitmap) => bitmap.clone(),
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, OperatorResult::Owned(_))
    }
}

impl From<RoaringBitmap> for OperatorResult<'_> {
    fn from(bitmap: RoaringBitmap) -> Self {
        OperatorResult::Owned(bitmap)
    }
}
