use rayon::prelude::*;

/// A dense row-major 2D grid. Terrain tiles do not wrap, so lookups that may
/// leave the grid go through [`Tilemap::try_get`].
#[derive(Clone, Debug, PartialEq)]
pub struct Tilemap<T> {
    pub width: usize,
    pub height: usize,
    data: Vec<T>,
}

impl<T: Clone> Tilemap<T> {
    pub fn new_with(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }
}

impl<T> Tilemap<T> {
    /// Wrap an existing row-major buffer. Returns `None` if the length does not
    /// match `width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Option<Self> {
        (data.len() == width * height).then_some(Self { width, height, data })
    }

    fn index(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.width && y < self.height, "({x}, {y}) outside {}x{}", self.width, self.height);
        y * self.width + x
    }

    pub fn get(&self, x: usize, y: usize) -> &T {
        &self.data[self.index(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, value: T) {
        let idx = self.index(x, y);
        self.data[idx] = value;
    }

    /// Signed lookup used by ray marching. Anything outside the grid is `None`.
    pub fn try_get(&self, x: i64, y: i64) -> Option<&T> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(self.get(x as usize, y as usize))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Iterate over all cells with their coordinates.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> {
        let width = self.width;
        self.data.iter().enumerate().map(move |(idx, val)| (idx % width, idx / width, val))
    }
}

impl<T: Send> Tilemap<T> {
    /// Build a map by evaluating `f(x, y)` for every cell on the rayon pool.
    /// `f` must be pure; cells are computed in no particular order.
    pub fn par_from_fn<F>(width: usize, height: usize, f: F) -> Self
    where
        F: Fn(usize, usize) -> T + Sync + Send,
    {
        let data = (0..width * height)
            .into_par_iter()
            .map(|idx| f(idx % width, idx / width))
            .collect();
        Self { width, height, data }
    }

    /// Visit every cell mutably on the rayon pool.
    pub fn par_for_each_mut<F>(&mut self, f: F)
    where
        F: Fn(usize, usize, &mut T) + Sync + Send,
    {
        let width = self.width;
        self.data
            .par_iter_mut()
            .enumerate()
            .for_each(|(idx, val)| f(idx % width, idx / width, val));
    }
}

impl<T: Sync> Tilemap<T> {
    /// Map every cell into a new grid of the same shape on the rayon pool.
    pub fn par_map<U, F>(&self, f: F) -> Tilemap<U>
    where
        U: Send,
        F: Fn(usize, usize, &T) -> U + Sync + Send,
    {
        let width = self.width;
        let data = self
            .data
            .par_iter()
            .enumerate()
            .map(|(idx, val)| f(idx % width, idx / width, val))
            .collect();
        Tilemap { width, height: self.height, data }
    }
}

impl Tilemap<f32> {
    /// Minimum and maximum value, or `None` for an empty map.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        if self.data.is_empty() {
            return None;
        }
        let mut min_h = f32::MAX;
        let mut max_h = f32::MIN;
        for &h in &self.data {
            if h < min_h { min_h = h; }
            if h > max_h { max_h = h; }
        }
        Some((min_h, max_h))
    }
}
