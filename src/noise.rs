//! Improved Perlin gradient noise and its fractal sum.

use glam::Vec3;

/// Maximum octaves honored by [`fractal`].
pub const MAX_OCTAVES: u32 = 16;

const PERM: [u8; 256] = [
    151, 160, 137, 91, 90, 15, 131, 13, 201, 95, 96, 53, 194, 233, 7, 225, 140, 36, 103, 30, 69,
    142, 8, 99, 37, 240, 21, 10, 23, 190, 6, 148, 247, 120, 234, 75, 0, 26, 197, 62, 94, 252, 219,
    203, 117, 35, 11, 32, 57, 177, 33, 88, 237, 149, 56, 87, 174, 20, 125, 136, 171, 168, 68, 175,
    74, 165, 71, 134, 139, 48, 27, 166, 77, 146, 158, 231, 83, 111, 229, 122, 60, 211, 133, 230,
    220, 105, 92, 41, 55, 46, 245, 40, 244, 102, 143, 54, 65, 25, 63, 161, 1, 216, 80, 73, 209, 76,
    132, 187, 208, 89, 18, 169, 200, 196, 135, 130, 116, 188, 159, 86, 164, 100, 109, 198, 173,
    186, 3, 64, 52, 217, 226, 250, 124, 123, 5, 202, 38, 147, 118, 126, 255, 82, 85, 212, 207, 206,
    59, 227, 47, 16, 58, 17, 182, 189, 28, 42, 223, 183, 170, 213, 119, 248, 152, 2, 44, 154, 163,
    70, 221, 153, 101, 155, 167, 43, 172, 9, 129, 22, 39, 253, 19, 98, 108, 110, 79, 113, 224, 232,
    178, 185, 112, 104, 218, 246, 97, 228, 251, 34, 242, 193, 238, 210, 144, 12, 191, 179, 162,
    241, 81, 51, 145, 235, 249, 14, 239, 107, 49, 192, 214, 31, 181, 199, 106, 157, 184, 84, 204,
    176, 115, 121, 50, 45, 127, 4, 150, 254, 138, 236, 205, 93, 222, 114, 67, 29, 24, 72, 243, 141,
    128, 195, 78, 66, 215, 61, 156, 180,
];

#[inline]
fn perm(x: i32) -> i32 {
    PERM[(x & 255) as usize] as i32
}

#[inline]
fn grad3(hash: i32, x: f32, y: f32, z: f32) -> f32 {
    let h = hash & 15;
    let u = if h < 8 { x } else { y };
    let v = if h < 4 {
        y
    } else if h == 12 || h == 14 {
        x
    } else {
        z
    };
    (if h & 1 != 0 { -u } else { u }) + (if h & 2 != 0 { -v } else { v })
}

#[inline]
fn fade(t: f32) -> f32 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + t * (b - a)
}

/// Signed noise, roughly in `[-1, 1]`, zero at integer lattice points.
pub fn perlin3(p: Vec3) -> f32 {
    let cell = p.floor();
    let (xi, yi, zi) = (cell.x as i32, cell.y as i32, cell.z as i32);
    let f = p - cell;
    let (u, v, w) = (fade(f.x), fade(f.y), fade(f.z));

    let a = perm(xi) + yi;
    let aa = perm(a) + zi;
    let ab = perm(a + 1) + zi;
    let b = perm(xi + 1) + yi;
    let ba = perm(b) + zi;
    let bb = perm(b + 1) + zi;

    let x1 = lerp(
        grad3(perm(aa), f.x, f.y, f.z),
        grad3(perm(ba), f.x - 1.0, f.y, f.z),
        u,
    );
    let x2 = lerp(
        grad3(perm(ab), f.x, f.y - 1.0, f.z),
        grad3(perm(bb), f.x - 1.0, f.y - 1.0, f.z),
        u,
    );
    let y1 = lerp(x1, x2, v);
    let x3 = lerp(
        grad3(perm(aa + 1), f.x, f.y, f.z - 1.0),
        grad3(perm(ba + 1), f.x - 1.0, f.y, f.z - 1.0),
        u,
    );
    let x4 = lerp(
        grad3(perm(ab + 1), f.x, f.y - 1.0, f.z - 1.0),
        grad3(perm(bb + 1), f.x - 1.0, f.y - 1.0, f.z - 1.0),
        u,
    );
    let y2 = lerp(x3, x4, v);
    lerp(y1, y2, w)
}

/// Fractal sum with halving amplitude per octave, normalized by the total
/// amplitude. `octaves` is clamped to `1..=MAX_OCTAVES`.
pub fn fractal(p: Vec3, octaves: u32, lacunarity: f32) -> f32 {
    let octaves = octaves.clamp(1, MAX_OCTAVES);
    let mut sum = 0.0;
    let mut norm = 0.0;
    let mut amplitude = 1.0;
    let mut frequency = 1.0;
    for _ in 0..octaves {
        sum += amplitude * perlin3(p * frequency);
        norm += amplitude;
        amplitude *= 0.5;
        frequency *= lacunarity;
    }
    sum / norm
}

/// Gradient of [`fractal`] by central differences.
pub fn fractal_gradient(p: Vec3, octaves: u32, lacunarity: f32) -> Vec3 {
    const H: f32 = 1e-3;
    let d = |axis: Vec3| {
        (fractal(p + axis * H, octaves, lacunarity) - fractal(p - axis * H, octaves, lacunarity))
            / (2.0 * H)
    };
    Vec3::new(d(Vec3::X), d(Vec3::Y), d(Vec3::Z))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_on_lattice_and_bounded() {
        assert_eq!(perlin3(Vec3::new(3.0, -2.0, 7.0)), 0.0);
        for i in 0..200 {
            let p = Vec3::new(i as f32 * 0.173, i as f32 * 0.311, i as f32 * -0.097);
            let n = fractal(p, 4, 2.0);
            assert!((-1.1..=1.1).contains(&n), "{} at {:?}", n, p);
        }
    }

    #[test]
    fn deterministic() {
        let p = Vec3::new(0.3, 1.7, -4.2);
        assert_eq!(fractal(p, 3, 2.0), fractal(p, 3, 2.0));
        assert_ne!(perlin3(p), 0.0);
    }

    #[test]
    fn gradient_points_uphill() {
        let p = Vec3::new(0.4, 0.6, 0.2);
        let g = fractal_gradient(p, 1, 2.0);
        let step = g.normalize() * 1e-2;
        assert!(fractal(p + step, 1, 2.0) > fractal(p, 1, 2.0));
    }
}
