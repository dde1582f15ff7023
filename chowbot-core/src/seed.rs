use crate::error::Result;
use crate::models::NewProduct;
use crate::store::Catalog;

/// (name, description, price, stock)
const DEFAULT_MENU: &[(&str, &str, f64, i32)] = &[
    ("Margherita Pizza", "Classic pizza with tomato sauce, mozzarella, and basil", 12.99, 50),
    ("Chicken Caesar Salad", "Fresh romaine lettuce with grilled chicken, croutons, and Caesar dressing", 9.99, 30),
    ("Cheeseburger", "Beef patty with cheddar cheese, lettuce, tomato, and special sauce", 8.50, 40),
    ("Vegetable Stir Fry", "Fresh seasonal vegetables stir-fried in soy ginger sauce", 11.25, 25),
    ("Chocolate Brownie", "Rich chocolate brownie with vanilla ice cream", 5.99, 35),
    ("Grilled Salmon", "Fresh salmon fillet with lemon herb butter and steamed vegetables", 16.50, 20),
    ("Pasta Carbonara", "Spaghetti with creamy sauce, pancetta, and parmesan cheese", 13.75, 30),
    ("Chicken Wings", "Spicy buffalo wings with blue cheese dip", 10.99, 45),
    ("Greek Salad", "Mixed greens with feta, olives, cucumber, and Greek dressing", 8.25, 30),
    ("Fruit Smoothie", "Blended seasonal fruits with yogurt and honey", 6.50, 40),
];

pub fn default_menu() -> Vec<NewProduct> {
    DEFAULT_MENU
        .iter()
        .enumerate()
        .map(|(i, (name, description, price, stock))| NewProduct {
            name: name.to_string(),
            description: description.to_string(),
            price: *price,
            stock: *stock,
            is_available: true,
            position: i as i32 + 1,
        })
        .collect()
}

/// Insert the default menu if the catalog is empty. Returns how many products
/// were inserted.
pub async fn seed_catalog(catalog: &dyn Catalog) -> Result<usize> {
    let existing = catalog.count_products().await?;
    if existing > 0 {
        tracing::info!("Found {} existing products. Skipping seed.", existing);
        return Ok(0);
    }

    let menu = default_menu();
    let count = menu.len();
    for product in menu {
        catalog.insert_product(product).await?;
    }

    tracing::info!("Seeded {} products into the catalog", count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_seed_only_runs_on_empty_catalog() {
        let store = MemoryStore::new(Duration::from_secs(60));

        assert_eq!(seed_catalog(&store).await.unwrap(), 10);
        assert_eq!(seed_catalog(&store).await.unwrap(), 0);
        assert_eq!(store.count_products().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_seeded_menu_keeps_listing_order() {
        let store = MemoryStore::new(Duration::from_secs(60));
        seed_catalog(&store).await.unwrap();

        let products = store.list_products().await.unwrap();
        assert_eq!(products[0].name, "Margherita Pizza");
        assert_eq!(products[0].price, 12.99);
        assert_eq!(products[0].stock, 50);
        assert_eq!(products[9].name, "Fruit Smoothie");
    }
}
