/// Parte `input` en trozos contiguos de tamaño `size` (el último puede ser
/// más chico). El trozo k contiene `input[k*size .. min((k+1)*size, len)]`.
///
/// Un `size` de 0 se trata como 1.
pub fn partition<T: Clone>(input: &[T], size: usize) -> Vec<Vec<T>> {
    input.chunks(size.max(1)).map(|chunk| chunk.to_vec()).collect()
}
