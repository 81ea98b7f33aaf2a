use std::ops::{Add, AddAssign, BitOr, BitOrAssign, Mul, Not};

use ndarray::{Array1, Array2, Axis};

/// Probabilities of exceedance for one site, `levels × columns`.
///
/// The operators mirror probability algebra under independence:
/// `|` is the union, `*` the intersection, `!` the complement.
/// Additive composition of mutually exclusive contributions is only
/// available on [`MutexCurve`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityCurve {
    pub array: Array2<f64>,
}

impl ProbabilityCurve {
    pub fn new(array: Array2<f64>) -> Self {
        ProbabilityCurve { array }
    }

    /// Single-column curve.
    pub fn from_levels(poes: &[f64]) -> Self {
        let array = Array1::from(poes.to_vec()).insert_axis(Axis(1));
        ProbabilityCurve { array }
    }

    pub fn zeros(levels: usize, columns: usize) -> Self {
        ProbabilityCurve { array: Array2::zeros((levels, columns)) }
    }

    pub fn num_levels(&self) -> usize {
        self.array.nrows()
    }

    pub fn num_columns(&self) -> usize {
        self.array.ncols()
    }

    /// Elementwise power, used for repeated occurrences.
    pub fn pow(&self, n: f64) -> Self {
        ProbabilityCurve { array: self.array.mapv(|x| x.powf(n)) }
    }

    /// One realization/group column as a new curve.
    pub fn extract(&self, idx: usize) -> Self {
        ProbabilityCurve { array: self.array.column(idx).to_owned().insert_axis(Axis(1)) }
    }

    pub fn into_mutex(self) -> MutexCurve {
        MutexCurve(self)
    }
}

impl BitOr for &ProbabilityCurve {
    type Output = ProbabilityCurve;

    fn bitor(self, other: &ProbabilityCurve) -> ProbabilityCurve {
        let array = 1.0 - (1.0 - &self.array) * (1.0 - &other.array);
        ProbabilityCurve { array }
    }
}

impl BitOr for ProbabilityCurve {
    type Output = ProbabilityCurve;

    fn bitor(self, other: ProbabilityCurve) -> ProbabilityCurve {
        &self | &other
    }
}

/// Union with a uniform probability. `curve | 0.0` is the curve itself.
impl BitOr<f64> for ProbabilityCurve {
    type Output = ProbabilityCurve;

    fn bitor(self, p: f64) -> ProbabilityCurve {
        if p == 0.0 {
            return self;
        }
        ProbabilityCurve { array: self.array.mapv(|x| 1.0 - (1.0 - x) * (1.0 - p)) }
    }
}

impl BitOrAssign<&ProbabilityCurve> for ProbabilityCurve {
    fn bitor_assign(&mut self, other: &ProbabilityCurve) {
        self.array.zip_mut_with(&other.array, |a, &b| *a = 1.0 - (1.0 - *a) * (1.0 - b));
    }
}

impl Mul for &ProbabilityCurve {
    type Output = ProbabilityCurve;

    fn mul(self, other: &ProbabilityCurve) -> ProbabilityCurve {
        ProbabilityCurve { array: &self.array * &other.array }
    }
}

impl Mul<f64> for &ProbabilityCurve {
    type Output = ProbabilityCurve;

    fn mul(self, s: f64) -> ProbabilityCurve {
        ProbabilityCurve { array: &self.array * s }
    }
}

impl Not for &ProbabilityCurve {
    type Output = ProbabilityCurve;

    fn not(self) -> ProbabilityCurve {
        ProbabilityCurve { array: 1.0 - &self.array }
    }
}

impl Not for ProbabilityCurve {
    type Output = ProbabilityCurve;

    fn not(self) -> ProbabilityCurve {
        !&self
    }
}

/// Accumulator for mutually exclusive contributions.
///
/// Exclusive alternatives add up (weighted); the union rule of
/// [`ProbabilityCurve`] would double count the overlap that cannot occur.
#[derive(Debug, Clone, PartialEq)]
pub struct MutexCurve(ProbabilityCurve);

impl MutexCurve {
    pub fn zeros(levels: usize, columns: usize) -> Self {
        MutexCurve(ProbabilityCurve::zeros(levels, columns))
    }

    /// `self += curve * weight`
    pub fn add_weighted(&mut self, curve: &ProbabilityCurve, weight: f64) {
        self.0.array.scaled_add(weight, &curve.array);
    }

    pub fn into_curve(self) -> ProbabilityCurve {
        self.0
    }
}

impl Add<&ProbabilityCurve> for MutexCurve {
    type Output = MutexCurve;

    fn add(mut self, other: &ProbabilityCurve) -> MutexCurve {
        self += other;
        self
    }
}

impl AddAssign<&ProbabilityCurve> for MutexCurve {
    fn add_assign(&mut self, other: &ProbabilityCurve) {
        self.0.array += &other.array;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    use super::*;

    fn assert_close(a: &ProbabilityCurve, b: &ProbabilityCurve) {
        assert_eq!(a.array.dim(), b.array.dim());
        for (x, y) in a.array.iter().zip(b.array.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn union_of_two_curves() {
        let a = ProbabilityCurve::from_levels(&[0.5, 0.2, 0.0]);
        let b = ProbabilityCurve::from_levels(&[0.5, 0.5, 0.1]);
        let u = &a | &b;
        assert_close(&u, &ProbabilityCurve::from_levels(&[0.75, 0.6, 0.1]));
    }

    #[test]
    fn union_with_zero_is_identity() {
        let a = ProbabilityCurve::from_levels(&[0.3, 0.1]);
        assert_eq!(a.clone() | 0.0, a);
    }

    #[test]
    fn union_over_empty_list_is_noop() {
        let acc = ProbabilityCurve::from_levels(&[0.3, 0.1]);
        let contributions: Vec<ProbabilityCurve> = Vec::new();
        let out = contributions.iter().fold(acc.clone(), |mut acc, c| {
            acc |= c;
            acc
        });
        assert_eq!(out, acc);
    }

    #[test]
    fn pow_composes_repeated_occurrences() {
        let pne = ProbabilityCurve::from_levels(&[0.9, 0.5]);
        assert_close(&pne.pow(2.0), &ProbabilityCurve::from_levels(&[0.81, 0.25]));
    }

    #[test]
    fn extract_takes_one_column() {
        let c = ProbabilityCurve::new(ndarray::array![[0.1, 0.2], [0.3, 0.4]]);
        assert_eq!(c.extract(1), ProbabilityCurve::from_levels(&[0.2, 0.4]));
        assert_eq!(c.num_levels(), 2);
        assert_eq!(c.num_columns(), 2);
    }

    #[test]
    fn mutex_contributions_add_with_weights() {
        let a = ProbabilityCurve::from_levels(&[0.4, 0.2]);
        let b = ProbabilityCurve::from_levels(&[0.8, 0.6]);
        let mut acc = MutexCurve::zeros(2, 1);
        acc.add_weighted(&a, 0.5);
        acc.add_weighted(&b, 0.5);
        assert_close(&acc.into_curve(), &ProbabilityCurve::from_levels(&[0.6, 0.4]));

        let sum = (a.clone().into_mutex() + &b).into_curve();
        assert_close(&sum, &ProbabilityCurve::from_levels(&[1.2, 0.8]));
    }

    fn curve3() -> impl Strategy<Value = ProbabilityCurve> {
        prop::collection::vec(0.0f64..=1.0, 3).prop_map(|v| ProbabilityCurve::from_levels(&v))
    }

    proptest! {
        #[test]
        fn union_is_associative_and_commutative(a in curve3(), b in curve3(), c in curve3()) {
            let left = &(&a | &b) | &c;
            let right = &a | &(&b | &c);
            let swapped = &(&c | &a) | &b;
            for ((x, y), z) in left.array.iter().zip(right.array.iter()).zip(swapped.array.iter()) {
                prop_assert!((x - y).abs() < 1e-12);
                prop_assert!((x - z).abs() < 1e-12);
            }
        }

        #[test]
        fn complement_is_an_involution(a in curve3()) {
            let back = !!a.clone();
            for (x, y) in back.array.iter().zip(a.array.iter()) {
                prop_assert!((x - y).abs() < 1e-15);
            }
        }

        #[test]
        fn multiplicative_and_union_identities(a in curve3()) {
            prop_assert_eq!(&a * 1.0, a.clone());
            prop_assert_eq!(a.clone() | 0.0, a);
        }
    }
}
