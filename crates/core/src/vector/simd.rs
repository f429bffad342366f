//! SIMD kernels for the brute-force scan
//!
//! The exact index spends nearly all of its time in squared-L2 distance, so
//! that kernel is vectorized with `pulp`, which picks AVX2/SSE/NEON at runtime
//! and falls back to scalar code elsewhere.

use pulp::Simd;

/// Squared L2 distance using SIMD acceleration.
///
/// # Panics
///
/// Panics if vectors have different lengths; callers validate dimensions first.
///
/// # Examples
///
/// ```
/// use framesift_core::vector::simd::l2_distance_squared_simd;
///
/// let a = vec![0.0, 0.0];
/// let b = vec![3.0, 4.0];
/// assert!((l2_distance_squared_simd(&a, &b) - 25.0).abs() < 1e-5);
/// ```
#[inline]
pub fn l2_distance_squared_simd(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let simd = pulp::Arch::new();

    simd.dispatch(|| l2_squared_simd_impl(simd, a, b))
}

/// Dot product using SIMD acceleration.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
pub fn dot_product_simd(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let simd = pulp::Arch::new();

    simd.dispatch(|| dot_product_simd_impl(simd, a, b))
}

#[inline(always)]
fn l2_squared_simd_impl(simd: pulp::Arch, a: &[f32], b: &[f32]) -> f32 {
    struct L2Squared<'a> {
        a: &'a [f32],
        b: &'a [f32],
    }

    impl pulp::WithSimd for L2Squared<'_> {
        type Output = f32;

        #[inline(always)]
        fn with_simd<S: Simd>(self, simd: S) -> Self::Output {
            let a = self.a;
            let b = self.b;
            let n = a.len();

            let lane_count = std::mem::size_of::<S::f32s>() / std::mem::size_of::<f32>();
            let simd_end = n - n % lane_count;

            let mut sum_squares = simd.f32s_splat(0.0);

            let mut i = 0;
            while i < simd_end {
                let a_vec = pulp::cast_lossy::<_, S::f32s>(simd.f32s_partial_load(&a[i..]));
                let b_vec = pulp::cast_lossy::<_, S::f32s>(simd.f32s_partial_load(&b[i..]));

                let diff = simd.f32s_sub(a_vec, b_vec);
                sum_squares = simd.f32s_mul_add_e(diff, diff, sum_squares);

                i += lane_count;
            }

            let mut result = simd.f32s_reduce_sum(sum_squares);

            // Remainder
            for i in simd_end..n {
                let diff = a[i] - b[i];
                result += diff * diff;
            }

            result
        }
    }

    simd.dispatch(L2Squared { a, b })
}

#[inline(always)]
fn dot_product_simd_impl(simd: pulp::Arch, a: &[f32], b: &[f32]) -> f32 {
    struct DotProduct<'a> {
        a: &'a [f32],
        b: &'a [f32],
    }

    impl pulp::WithSimd for DotProduct<'_> {
        type Output = f32;

        #[inline(always)]
        fn with_simd<S: Simd>(self, simd: S) -> Self::Output {
            let a = self.a;
            let b = self.b;
            let n = a.len();

            let lane_count = std::mem::size_of::<S::f32s>() / std::mem::size_of::<f32>();
            let simd_end = n - n % lane_count;

            let mut sum = simd.f32s_splat(0.0);

            let mut i = 0;
            while i < simd_end {
                let a_vec = pulp::cast_lossy::<_, S::f32s>(simd.f32s_partial_load(&a[i..]));
                let b_vec = pulp::cast_lossy::<_, S::f32s>(simd.f32s_partial_load(&b[i..]));
                sum = simd.f32s_mul_add_e(a_vec, b_vec, sum);
                i += lane_count;
            }

            let mut result = simd.f32s_reduce_sum(sum);

            for i in simd_end..n {
                result += a[i] * b[i];
            }

            result
        }
    }

    simd.dispatch(DotProduct { a, b })
}
