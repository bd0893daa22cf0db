//! Parameter vector adapter.
//!
//! A [`ParameterSet`] is the structured view of the variational parameters:
//! an ordered list of named groups, each a matrix tagged real or complex.
//! Optimization code works on the flattened view, one complex entry per
//! scalar, so that `n_par == flatten().len()` regardless of the tags.
//!
//! Groups are flattened in insertion order and each matrix in nalgebra's
//! column-major storage order. Layers use the same order when they write
//! gradients, so a Jacobian column index and a flattened parameter index
//! always refer to the same scalar.

use log::debug;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::error::{Error, Result};

/// Whether a parameter group holds real-only or complex values.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Real,
    Complex,
}

/// One named parameter tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamGroup {
    pub name: String,
    pub kind: ParamKind,
    pub values: DMatrix<Complex64>,
}

impl ParamGroup {
    /// Real-valued group built from a real matrix.
    pub fn real(name: impl Into<String>, values: &DMatrix<f64>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Real,
            values: values.map(|v| Complex64::new(v, 0.0)),
        }
    }

    pub fn complex(name: impl Into<String>, values: DMatrix<Complex64>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Complex,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.shape()
    }
}

/// Ordered collection of parameter groups; never resized after construction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterSet {
    groups: Vec<ParamGroup>,
}

impl ParameterSet {
    pub fn new(groups: Vec<ParamGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    /// Total number of scalars, i.e. the length of the flattened vector.
    pub fn n_par(&self) -> usize {
        self.groups.iter().map(ParamGroup::len).sum()
    }

    /// Concatenate all groups into one vector.
    pub fn flatten(&self) -> DVector<Complex64> {
        DVector::from_iterator(
            self.n_par(),
            self.groups.iter().flat_map(|g| g.values.iter().copied()),
        )
    }

    /// Build a new set with this set's layout and the values of `flat`.
    pub fn unflatten(&self, flat: &DVector<Complex64>) -> Result<ParameterSet> {
        let mut out = self.clone();
        out.assign(flat)?;
        Ok(out)
    }

    /// Overwrite the values in place from a flattened vector.
    ///
    /// Values are copied verbatim, real groups included; use
    /// [`ParameterSet::project`] first if the vector may carry imaginary
    /// parts for real groups.
    pub fn assign(&mut self, flat: &DVector<Complex64>) -> Result<()> {
        self.check_len("ParameterSet::assign", flat.len())?;
        let mut offset = 0;
        for group in self.groups.iter_mut() {
            let n = group.len();
            group
                .values
                .as_mut_slice()
                .copy_from_slice(&flat.as_slice()[offset..offset + n]);
            offset += n;
        }
        Ok(())
    }

    /// Drop the imaginary part of every entry that belongs to a real group.
    pub fn project(&self, candidate: &DVector<Complex64>) -> Result<DVector<Complex64>> {
        self.check_len("ParameterSet::project", candidate.len())?;
        let mut out = candidate.clone();
        let mut offset = 0;
        let mut discarded = 0usize;
        for group in &self.groups {
            let n = group.len();
            if group.kind == ParamKind::Real {
                for z in out.as_mut_slice()[offset..offset + n].iter_mut() {
                    if z.im != 0.0 {
                        discarded += 1;
                    }
                    *z = Complex64::new(z.re, 0.0);
                }
            }
            offset += n;
        }
        if discarded > 0 {
            debug!("projection discarded {} imaginary components on real groups", discarded);
        }
        Ok(out)
    }

    /// Per-entry mask: `true` where the flattened entry belongs to a real group.
    pub fn real_mask(&self) -> Vec<bool> {
        self.groups
            .iter()
            .flat_map(|g| std::iter::repeat(g.kind == ParamKind::Real).take(g.len()))
            .collect()
    }

    fn check_len(&self, context: &'static str, actual: usize) -> Result<()> {
        let expected = self.n_par();
        if actual != expected {
            return Err(Error::shape(context, expected, actual));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mixed_set() -> ParameterSet {
        ParameterSet::new(vec![
            ParamGroup::real("0.weight", &DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])),
            ParamGroup::complex(
                "1.amplitude",
                DMatrix::from_column_slice(2, 1, &[Complex64::new(0.5, -1.0), Complex64::new(2.0, 3.0)]),
            ),
            ParamGroup::real("2.bias", &DMatrix::from_column_slice(1, 1, &[-7.0])),
        ])
    }

    #[test]
    fn test_flatten_uses_column_major_group_order() {
        let set = mixed_set();
        let flat = set.flatten();
        assert_eq!(flat.len(), 9);
        assert_eq!(set.n_par(), 9);
        // column-major: (0,0), (1,0), (0,1), ...
        assert_eq!(flat[0], Complex64::new(1.0, 0.0));
        assert_eq!(flat[1], Complex64::new(4.0, 0.0));
        assert_eq!(flat[2], Complex64::new(2.0, 0.0));
        assert_eq!(flat[6], Complex64::new(0.5, -1.0));
        assert_eq!(flat[8], Complex64::new(-7.0, 0.0));
    }

    #[test]
    fn test_unflatten_rejects_wrong_length() {
        let set = mixed_set();
        let short = DVector::from_element(4, Complex64::new(1.0, 0.0));
        match set.unflatten(&short) {
            Err(Error::ShapeMismatch { expected, actual, .. }) => {
                assert_eq!(expected, 9);
                assert_eq!(actual, 4);
            }
            other => panic!("expected ShapeMismatch, got {:?}", other),
        }
        assert!(set.project(&short).is_err());
    }

    #[test]
    fn test_project_zeroes_imaginary_on_real_groups_only() {
        let set = mixed_set();
        let candidate = DVector::from_fn(9, |i, _| Complex64::new(i as f64, 1.0 + i as f64));
        let projected = set.project(&candidate).unwrap();
        let mask = set.real_mask();
        for i in 0..9 {
            assert_eq!(projected[i].re, candidate[i].re);
            if mask[i] {
                assert_eq!(projected[i].im, 0.0);
            } else {
                assert_eq!(projected[i].im, candidate[i].im);
            }
        }
    }

    #[test]
    fn test_project_is_idempotent() {
        let set = mixed_set();
        let candidate = DVector::from_fn(9, |i, _| Complex64::new(-(i as f64), 0.25 * i as f64));
        let once = set.project(&candidate).unwrap();
        let twice = set.project(&once).unwrap();
        assert_eq!(once, twice);
    }

    fn arb_group(index: usize) -> impl Strategy<Value = ParamGroup> {
        (1usize..4, 1usize..4, any::<bool>()).prop_flat_map(move |(r, c, is_real)| {
            proptest::collection::vec((-1e3f64..1e3, -1e3f64..1e3), r * c).prop_map(move |vals| {
                let name = format!("{}.p", index);
                if is_real {
                    let m = DMatrix::from_iterator(r, c, vals.iter().map(|(re, _)| *re));
                    ParamGroup::real(name, &m)
                } else {
                    let m = DMatrix::from_iterator(r, c, vals.iter().map(|(re, im)| Complex64::new(*re, *im)));
                    ParamGroup::complex(name, m)
                }
            })
        })
    }

    fn arb_set() -> impl Strategy<Value = ParameterSet> {
        (1usize..5)
            .prop_flat_map(|n| (0..n).map(arb_group).collect::<Vec<_>>())
            .prop_map(ParameterSet::new)
    }

    proptest! {
        #[test]
        fn prop_unflatten_inverts_flatten(set in arb_set()) {
            let restored = set.unflatten(&set.flatten()).unwrap();
            prop_assert_eq!(restored, set);
        }

        #[test]
        fn prop_project_twice_equals_once(set in arb_set(), shift in -5.0f64..5.0) {
            let candidate = set.flatten().map(|z| z + Complex64::new(shift, shift));
            let once = set.project(&candidate).unwrap();
            prop_assert_eq!(set.project(&once).unwrap(), once);
        }
    }
}
